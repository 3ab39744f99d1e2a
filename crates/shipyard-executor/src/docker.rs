//! Local Docker executor implementation.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use shipyard_core::executor::*;
use shipyard_core::{Error, ResourceId, Result};
use tracing::{debug, info, warn};

/// Docker executor: one container per build job.
pub struct LocalDockerExecutor {
    docker: Docker,
}

impl LocalDockerExecutor {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// Whether the daemon answers.
    pub async fn ping(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    fn container_name(job_id: &ResourceId) -> String {
        format!("shipyard-build-{}", job_id)
    }

    async fn pull(&self, image: &str) {
        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut pull_stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = pull_stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                // A locally built image has nothing to pull.
                Err(e) => warn!(error = %e, "Pull warning"),
            }
        }
    }

    async fn remove(&self, container_name: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(container_name, Some(options))
            .await
            .map_err(|e| Error::Internal(format!("failed to remove container: {}", e)))
    }
}

/// Environment variable carrying the clone token into the container.
const GIT_TOKEN_ENV: &str = "SHIPYARD_GIT_TOKEN";

/// Shell lines cloning the repository and checking out the pinned commit.
///
/// Build images such as `docker:*-cli` ship without git, so it is installed
/// on the fly when missing. The token is read from [`GIT_TOKEN_ENV`] by a
/// credential helper and never appears on the command line.
fn clone_script(git_clone: &GitCloneSpec) -> Vec<String> {
    let depth_arg = git_clone
        .depth
        .map(|d| format!(" --depth {}", d))
        .unwrap_or_default();
    let branch_arg = git_clone
        .branch
        .as_ref()
        .map(|b| format!(" -b {}", b))
        .unwrap_or_default();
    let credentials = if git_clone.access_token.is_some() {
        format!(
            " -c credential.helper='!f() {{ echo username=x-access-token; echo \"password=${}\"; }}; f'",
            GIT_TOKEN_ENV
        )
    } else {
        String::new()
    };

    let mut lines = vec![
        "command -v git >/dev/null 2>&1 || apk add --no-cache -q git".to_string(),
        format!(
            "git{} clone -q{}{} {} {}",
            credentials, depth_arg, branch_arg, git_clone.url, git_clone.target_dir
        ),
    ];
    if let Some(sha) = &git_clone.sha {
        lines.push(format!("git -C {} checkout -q {}", git_clone.target_dir, sha));
    }
    lines.push(format!("cd {}", git_clone.target_dir));
    lines
}

/// The container command: clone first when requested, then the job's
/// commands in order, stopping at the first failure.
///
/// Each command is its own line under `set -e`, so a `||` inside one
/// command cannot mask the failure of an earlier one.
fn container_command(spec: &JobSpec) -> Option<Vec<String>> {
    let mut lines = spec
        .git_clone
        .as_ref()
        .map(clone_script)
        .unwrap_or_default();
    if lines.is_empty() && spec.command.is_empty() {
        return None;
    }
    lines.extend(spec.command.iter().cloned());

    let script = format!("set -e\n{}", lines.join("\n"));
    Some(vec!["sh".to_string(), "-c".to_string(), script])
}

fn parse_docker_time(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl Executor for LocalDockerExecutor {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn spawn(&self, spec: JobSpec) -> Result<JobHandle> {
        let container_name = Self::container_name(&spec.id);
        self.pull(&spec.image).await;

        let mut env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        if let Some(token) = spec.git_clone.as_ref().and_then(|g| g.access_token.as_ref()) {
            env.push(format!("{}={}", GIT_TOKEN_ENV, token));
        }

        // The clone creates the target dir, so it cannot be the initial cwd.
        let working_dir = if spec.git_clone.is_some() {
            None
        } else {
            spec.working_dir.clone()
        };

        let binds: Option<Vec<String>> = if spec.volumes.is_empty() {
            None
        } else {
            Some(
                spec.volumes
                    .iter()
                    .map(|v| {
                        let mode = if v.read_only { "ro" } else { "rw" };
                        format!("{}:{}:{}", v.name, v.mount_path, mode)
                    })
                    .collect(),
            )
        };

        let host_config = HostConfig {
            binds,
            privileged: Some(spec.privileged),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: container_command(&spec),
            env: Some(env),
            working_dir,
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.clone(),
            platform: None,
        };

        info!(container = %container_name, "Creating container");
        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| Error::Build(format!("failed to create container: {}", e)))?;

        info!(container = %container_name, "Starting container");
        if let Err(e) = self
            .docker
            .start_container(&container_name, None::<StartContainerOptions<String>>)
            .await
        {
            let _ = self.remove(&container_name).await;
            return Err(Error::Build(format!("failed to start container: {}", e)));
        }

        Ok(JobHandle {
            id: spec.id,
            executor_id: container.id,
            executor_name: self.name().to_string(),
            timeout: spec.timeout,
        })
    }

    async fn logs(&self, handle: &JobHandle) -> Result<BoxStream<'static, LogLine>> {
        let container_name = Self::container_name(&handle.id);

        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let stream = self.docker.logs(&container_name, Some(options));

        let mapped_stream = stream.filter_map(|result| async move {
            match result {
                Ok(output) => {
                    let (stream, message) = match output {
                        LogOutput::StdErr { message } => (LogStream::Stderr, message),
                        LogOutput::StdOut { message }
                        | LogOutput::Console { message }
                        | LogOutput::StdIn { message } => (LogStream::Stdout, message),
                    };
                    Some(LogLine {
                        timestamp: Utc::now(),
                        stream,
                        content: String::from_utf8_lossy(&message).trim_end().to_string(),
                    })
                }
                Err(e) => {
                    warn!(error = %e, "Log stream error");
                    None
                }
            }
        });

        Ok(Box::pin(mapped_stream))
    }

    async fn status(&self, handle: &JobHandle) -> Result<JobStatus> {
        let container_name = Self::container_name(&handle.id);

        let inspect = self
            .docker
            .inspect_container(&container_name, None)
            .await
            .map_err(|e| Error::NotFound(format!("container {}: {}", container_name, e)))?;

        let state = inspect
            .state
            .ok_or_else(|| Error::Internal("container has no state".to_string()))?;

        let started_at = parse_docker_time(state.started_at);

        let status = if state.running.unwrap_or(false) {
            JobStatus::Running {
                started_at: started_at.unwrap_or_else(Utc::now),
            }
        } else if state.paused.unwrap_or(false) {
            JobStatus::Pending
        } else {
            let exit_code = state.exit_code.map(|c| c as i32);
            let finished_at = parse_docker_time(state.finished_at).unwrap_or_else(Utc::now);

            if exit_code == Some(0) {
                JobStatus::Succeeded {
                    started_at: started_at.unwrap_or(finished_at),
                    finished_at,
                }
            } else {
                JobStatus::Failed {
                    started_at,
                    finished_at,
                    exit_code,
                    message: state.error.unwrap_or_default(),
                }
            }
        };

        Ok(status)
    }

    async fn wait(&self, handle: &JobHandle) -> Result<JobResult> {
        let container_name = Self::container_name(&handle.id);

        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(&container_name, Some(options));

        let waited = match handle.timeout {
            Some(limit) => tokio::time::timeout(limit, stream.next()).await.ok(),
            None => Some(stream.next().await),
        };

        let Some(next) = waited else {
            warn!(container = %container_name, "Build timed out, stopping container");
            self.remove(&container_name).await?;
            return Ok(JobResult {
                status: JobStatus::Failed {
                    started_at: None,
                    finished_at: Utc::now(),
                    exit_code: None,
                    message: "timed out".to_string(),
                },
                exit_code: None,
            });
        };

        // A non-zero exit surfaces as an error from the wait stream; the
        // inspected state below is authoritative either way.
        if let Some(Err(e)) = &next {
            debug!(error = %e, "Wait returned an error");
        }

        let status = self.status(handle).await?;
        let exit_code = match &status {
            JobStatus::Succeeded { .. } => Some(0),
            JobStatus::Failed { exit_code, .. } => *exit_code,
            _ => None,
        };

        Ok(JobResult { status, exit_code })
    }

    async fn cleanup(&self, handle: &JobHandle) -> Result<()> {
        self.remove(&Self::container_name(&handle.id)).await
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<()> {
        let container_name = Self::container_name(&handle.id);
        info!(container = %container_name, "Cancelling build");
        self.remove(&container_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_test_spec(git_clone: Option<GitCloneSpec>) -> JobSpec {
        JobSpec {
            id: ResourceId::new(),
            image: "docker:27-cli".to_string(),
            command: vec!["env".to_string(), "docker build -t repo:abc .".to_string()],
            working_dir: Some("/workspace".to_string()),
            env: HashMap::from([("FOO".to_string(), "bar".to_string())]),
            timeout: None,
            volumes: vec![],
            git_clone,
            privileged: true,
        }
    }

    fn clone_spec() -> GitCloneSpec {
        GitCloneSpec {
            url: "https://github.com/owner/repo.git".to_string(),
            branch: Some("main".to_string()),
            sha: Some("abc1234".to_string()),
            target_dir: "/workspace".to_string(),
            depth: None,
            access_token: Some("tok".to_string()),
        }
    }

    #[test]
    fn test_container_name() {
        let id = ResourceId::new();
        let name = LocalDockerExecutor::container_name(&id);
        assert!(name.starts_with("shipyard-build-"));
        assert_eq!(name, LocalDockerExecutor::container_name(&id));
        assert_ne!(name, LocalDockerExecutor::container_name(&ResourceId::new()));
    }

    fn run_script(cmd: &[String]) -> Option<i32> {
        std::process::Command::new(&cmd[0])
            .args(&cmd[1..])
            .output()
            .unwrap()
            .status
            .code()
    }

    #[test]
    fn test_clone_script_pins_revision() {
        let script = clone_script(&clone_spec());
        assert!(script[1].ends_with("clone -q -b main https://github.com/owner/repo.git /workspace"));
        assert_eq!(script[2], "git -C /workspace checkout -q abc1234");
        assert_eq!(script[3], "cd /workspace");
    }

    #[test]
    fn test_clone_token_stays_off_the_command_line() {
        let spec = make_test_spec(Some(clone_spec()));
        let cmd = container_command(&spec).unwrap();
        assert!(!cmd[2].contains("tok@"));
        assert!(cmd[2].contains("credential.helper"));
        assert!(cmd[2].contains("$SHIPYARD_GIT_TOKEN"));

        let mut public = clone_spec();
        public.access_token = None;
        assert!(!clone_script(&public)[1].contains("credential.helper"));
    }

    #[test]
    fn test_command_with_clone_runs_in_checkout() {
        let spec = make_test_spec(Some(clone_spec()));
        let cmd = container_command(&spec).unwrap();
        assert_eq!(cmd[0], "sh");
        assert_eq!(cmd[1], "-c");
        assert!(cmd[2].starts_with("set -e\n"));
        assert!(cmd[2].ends_with("cd /workspace\nenv\ndocker build -t repo:abc ."));
    }

    #[test]
    fn test_command_without_clone() {
        let spec = make_test_spec(None);
        let cmd = container_command(&spec).unwrap();
        assert_eq!(cmd[..2], ["sh".to_string(), "-c".to_string()]);
        assert_eq!(cmd[2], "set -e\nenv\ndocker build -t repo:abc .");

        let mut empty = make_test_spec(None);
        empty.command.clear();
        assert!(container_command(&empty).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_fallback_does_not_mask_earlier_failure() {
        let mut spec = make_test_spec(None);
        spec.command = vec!["false".to_string(), "echo fallback || true".to_string()];
        assert_ne!(run_script(&container_command(&spec).unwrap()), Some(0));

        spec.command = vec!["true".to_string(), "false || echo recovered".to_string()];
        assert_eq!(run_script(&container_command(&spec).unwrap()), Some(0));
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_clone_fails_the_job() {
        let mut git_clone = clone_spec();
        git_clone.url = "file:///nonexistent/shipyard-repo.git".to_string();
        git_clone.target_dir = std::env::temp_dir()
            .join(format!("shipyard-clone-{}", ResourceId::new()))
            .display()
            .to_string();
        git_clone.access_token = None;
        let mut spec = make_test_spec(Some(git_clone));
        spec.command = vec!["echo fallback || true".to_string()];
        assert_ne!(run_script(&container_command(&spec).unwrap()), Some(0));
    }

    #[test]
    fn test_parse_docker_time() {
        let parsed = parse_docker_time(Some("2024-05-01T12:00:00.123456789Z".to_string()));
        assert!(parsed.is_some());
        assert!(parse_docker_time(Some("0001-01-01T00:00:00Z garbage".to_string())).is_none());
        assert!(parse_docker_time(None).is_none());
    }
}

/// Integration tests that require Docker to be running.
/// Run with: cargo test -- --ignored
#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::collections::HashMap;

    fn spec(command: &str) -> JobSpec {
        JobSpec {
            id: ResourceId::new(),
            image: "alpine:latest".to_string(),
            command: vec![command.to_string()],
            working_dir: None,
            env: HashMap::new(),
            timeout: None,
            volumes: vec![],
            git_clone: None,
            privileged: false,
        }
    }

    #[tokio::test]
    #[ignore]
    async fn test_successful_job() {
        let executor = LocalDockerExecutor::new().unwrap();
        assert!(executor.ping().await);

        let handle = executor.spawn(spec("echo hello")).await.unwrap();
        let lines: Vec<LogLine> = executor.logs(&handle).await.unwrap().collect().await;
        assert!(lines.iter().any(|l| l.content == "hello"));

        let result = executor.wait(&handle).await.unwrap();
        assert_eq!(result.exit_code, Some(0));
        assert!(matches!(result.status, JobStatus::Succeeded { .. }));
        executor.cleanup(&handle).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_failing_job() {
        let executor = LocalDockerExecutor::new().unwrap();
        let handle = executor.spawn(spec("exit 3")).await.unwrap();
        let result = executor.wait(&handle).await.unwrap();
        assert_eq!(result.exit_code, Some(3));
        assert!(matches!(result.status, JobStatus::Failed { .. }));
        executor.cleanup(&handle).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_timeout_stops_job() {
        let executor = LocalDockerExecutor::new().unwrap();
        let mut job = spec("sleep 30");
        job.timeout = Some(std::time::Duration::from_secs(1));
        let handle = executor.spawn(job).await.unwrap();
        let result = executor.wait(&handle).await.unwrap();
        assert!(matches!(result.status, JobStatus::Failed { ref message, .. } if message == "timed out"));
    }
}
