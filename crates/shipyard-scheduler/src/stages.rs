//! Stage runners: the work behind the source, build and deploy stages.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use shipyard_config::{PipelineConfig, VariableContextBuilder};
use shipyard_core::artifact::{ArtifactKey, ArtifactRef, ArtifactStore};
use shipyard_core::deployer::{DeployTarget, Deployer, RolloutOutcome, RolloutRequest};
use shipyard_core::descriptor::{
    IMAGE_DEFINITIONS_FILE, ImageDefinition, ImageDefinitions, ImageReference,
};
use shipyard_core::executor::{
    Executor, GitCloneSpec, JobSpec, JobStatus, LogLine, LogStream, VolumeMount,
};
use shipyard_core::pipeline::{PipelineRun, StageKind};
use shipyard_core::secret::SecretStore;
use shipyard_core::source::{SOURCE_MANIFEST_FILE, SourceManifest, SourceProvider};
use shipyard_core::{Error, ResourceId, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::events::PipelineEvent;

/// File name of the deploy stage's rollout record.
pub const ROLLOUT_FILE: &str = "rollout.json";

const WORKSPACE_DIR: &str = "/workspace";
const DOCKER_SOCKET: &str = "/var/run/docker.sock";
const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// What a stage runner gets to work with.
pub struct StageContext {
    /// The run as it was when the stage was dispatched.
    pub run: PipelineRun,
    pub stage: StageKind,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub events: broadcast::Sender<PipelineEvent>,
}

impl StageContext {
    pub fn run_id(&self) -> ResourceId {
        self.run.id
    }

    pub fn log(&self, line: LogLine) {
        let _ = self.events.send(PipelineEvent::StageLog {
            run_id: self.run.id,
            stage: self.stage,
            line,
        });
    }

    /// Emit a line attributed to Shipyard itself rather than the job.
    pub fn system_log(&self, content: impl Into<String>) {
        self.log(LogLine {
            timestamp: Utc::now(),
            stream: LogStream::System,
            content: content.into(),
        });
    }

    /// Store an output of the current stage.
    pub async fn put_artifact(&self, name: &str, data: Vec<u8>) -> Result<ArtifactRef> {
        let key = ArtifactKey::new(self.run.id, self.stage, name);
        self.artifacts.put(&key, Bytes::from(data)).await
    }

    /// The artifact an earlier stage of this run produced.
    pub async fn read_artifact(&self, stage: StageKind) -> Result<Bytes> {
        let reference = self.run.artifact_of(stage).ok_or_else(|| {
            Error::InvalidState(format!(
                "run {} has no {} artifact",
                self.run.id, stage
            ))
        })?;
        self.artifacts.get(reference).await
    }
}

/// Executes one stage of a run.
#[async_trait]
pub trait StageRunner: Send + Sync {
    fn stage(&self) -> StageKind;

    /// Do the stage's work; the returned artifact is attached to the stage
    /// result. Any error fails the run at this stage.
    async fn run(&self, ctx: &StageContext) -> Result<Option<ArtifactRef>>;
}

/// Pins the triggering branch to a revision.
pub struct SourceStage {
    provider: Arc<dyn SourceProvider>,
}

impl SourceStage {
    pub fn new(provider: Arc<dyn SourceProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl StageRunner for SourceStage {
    fn stage(&self) -> StageKind {
        StageKind::Source
    }

    async fn run(&self, ctx: &StageContext) -> Result<Option<ArtifactRef>> {
        let trigger = &ctx.run.trigger;
        let branch = trigger
            .branch
            .as_deref()
            .ok_or_else(|| Error::Trigger("run has no branch".to_string()))?;

        let manifest = self
            .provider
            .resolve(branch, trigger.revision.as_deref())
            .await?;
        ctx.system_log(format!(
            "{} {} at {}",
            manifest.repository, manifest.branch, manifest.revision
        ));

        let data = serde_json::to_vec_pretty(&manifest)?;
        Ok(Some(ctx.put_artifact(SOURCE_MANIFEST_FILE, data).await?))
    }
}

/// Builds and pushes the image, then writes `imagedefinitions.json`.
pub struct BuildStage {
    executor: Arc<dyn Executor>,
    secrets: Arc<dyn SecretStore>,
    config: PipelineConfig,
}

impl BuildStage {
    pub fn new(
        executor: Arc<dyn Executor>,
        secrets: Arc<dyn SecretStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            executor,
            secrets,
            config,
        }
    }

    /// The image reference this run's build pushes.
    pub fn image_for(&self, run: &PipelineRun, manifest: &SourceManifest) -> ImageReference {
        let tag = self.config.build.tag.resolve(Some(&manifest.revision), run.id);
        ImageReference::new(self.config.registry.repository.clone(), tag)
    }

    async fn job_spec(
        &self,
        ctx: &StageContext,
        manifest: &SourceManifest,
        image: &ImageReference,
    ) -> Result<(JobSpec, shipyard_config::VariableContext)> {
        let build = &self.config.build;
        let run = &ctx.run;

        let mut vars = VariableContextBuilder::new()
            .with_git_sha(manifest.revision.clone())
            .with_git_branch(manifest.branch.clone())
            .with_git_repository(manifest.repository.clone())
            .with_run(self.config.name.clone(), run.id.to_string(), run.number)
            .with_stage(ctx.stage.as_str())
            .with_image(image)
            .with_service(self.config.deploy.service.clone());
        for (key, value) in &build.env {
            vars = vars.with_env(key.clone(), value.clone());
        }
        for (name, path) in &build.secrets {
            vars = vars.with_secret(name.clone(), self.secrets.get(path).await?);
        }
        let vars = vars.build();

        let access_token = match &self.config.source.token_secret {
            Some(path) => Some(self.secrets.get(path).await?),
            None => None,
        };

        let env: HashMap<String, String> = vars.interpolate_map(&build.env).into_iter().collect();

        let spec = JobSpec {
            id: ResourceId::new(),
            image: build.image.clone(),
            command: vars.interpolate_vec(build.commands()),
            working_dir: Some(WORKSPACE_DIR.to_string()),
            env,
            timeout: build.timeout_secs.map(Duration::from_secs),
            volumes: vec![VolumeMount {
                name: DOCKER_SOCKET.to_string(),
                mount_path: DOCKER_SOCKET.to_string(),
                read_only: false,
            }],
            git_clone: Some(GitCloneSpec {
                url: manifest.repository.clone(),
                branch: Some(manifest.branch.clone()),
                sha: Some(manifest.revision.clone()),
                target_dir: WORKSPACE_DIR.to_string(),
                depth: None,
                access_token,
            }),
            privileged: false,
        };
        Ok((spec, vars))
    }
}

#[async_trait]
impl StageRunner for BuildStage {
    fn stage(&self) -> StageKind {
        StageKind::Build
    }

    async fn run(&self, ctx: &StageContext) -> Result<Option<ArtifactRef>> {
        let manifest: SourceManifest =
            serde_json::from_slice(&ctx.read_artifact(StageKind::Source).await?)?;
        let image = self.image_for(&ctx.run, &manifest);
        let (spec, vars) = self.job_spec(ctx, &manifest, &image).await?;

        info!(
            run_id = %ctx.run_id(),
            revision = %manifest.short_revision(),
            image = %image,
            executor = self.executor.name(),
            "Starting build"
        );
        ctx.system_log(format!("building {}", image));

        let handle = self.executor.spawn(spec).await?;
        let mut log_stream = self.executor.logs(&handle).await?;

        let log_ctx = (ctx.events.clone(), ctx.run_id(), ctx.stage);
        let log_task = tokio::spawn(async move {
            let (events, run_id, stage) = log_ctx;
            while let Some(mut line) = log_stream.next().await {
                line.content = vars.mask(&line.content);
                let _ = events.send(PipelineEvent::StageLog {
                    run_id,
                    stage,
                    line,
                });
            }
        });

        let waited = self.executor.wait(&handle).await;

        // Let the tail of the log arrive before the job is removed.
        let abort = log_task.abort_handle();
        if tokio::time::timeout(LOG_DRAIN_TIMEOUT, log_task).await.is_err() {
            abort.abort();
        }
        if let Err(e) = self.executor.cleanup(&handle).await {
            warn!(run_id = %ctx.run_id(), error = %e, "Failed to clean up build job");
        }

        match waited?.status {
            JobStatus::Succeeded { .. } => {}
            JobStatus::Failed {
                exit_code, message, ..
            } => {
                let reason = match exit_code {
                    Some(code) if message.is_empty() => format!("build exited with code {}", code),
                    Some(code) => format!("build exited with code {}: {}", code, message),
                    None => format!("build did not finish: {}", message),
                };
                return Err(Error::Build(reason));
            }
            JobStatus::Cancelled { .. } => {
                return Err(Error::Build("build was cancelled".to_string()));
            }
            JobStatus::Pending | JobStatus::Running { .. } => {
                return Err(Error::Build("build ended in an unexpected state".to_string()));
            }
        }

        let definitions = ImageDefinitions::single(ImageDefinition::new(
            self.config.deploy.service.clone(),
            image.to_string(),
        ));
        let reference = ctx
            .put_artifact(IMAGE_DEFINITIONS_FILE, definitions.to_json()?)
            .await?;
        info!(run_id = %ctx.run_id(), image = %image, "Build succeeded");
        Ok(Some(reference))
    }
}

/// Rolls the built image out to the running service.
pub struct DeployStage {
    deployer: Arc<dyn Deployer>,
    target: DeployTarget,
}

impl DeployStage {
    pub fn new(deployer: Arc<dyn Deployer>, target: DeployTarget) -> Self {
        Self { deployer, target }
    }
}

#[async_trait]
impl StageRunner for DeployStage {
    fn stage(&self) -> StageKind {
        StageKind::Deploy
    }

    async fn run(&self, ctx: &StageContext) -> Result<Option<ArtifactRef>> {
        let raw = ctx.read_artifact(StageKind::Build).await.map_err(|e| match e {
            Error::InvalidState(msg) | Error::NotFound(msg) => Error::Deploy(msg),
            other => other,
        })?;
        let definitions = ImageDefinitions::from_json(&raw)?;

        let mut outcomes: Vec<(ImageDefinition, RolloutOutcome)> = Vec::new();
        for definition in definitions.iter() {
            let outcome = self
                .deployer
                .rollout(RolloutRequest {
                    run_id: ctx.run_id(),
                    target: self.target.clone(),
                    definition: definition.clone(),
                })
                .await?;
            let summary = match &outcome {
                RolloutOutcome::Started { .. } => "rolling out",
                RolloutOutcome::Unchanged => "already running",
            };
            ctx.system_log(format!(
                "{} {} to {}: {}",
                summary, definition.image_uri, self.target, definition.name
            ));
            info!(
                run_id = %ctx.run_id(),
                target = %self.target,
                image = %definition.image_uri,
                ?outcome,
                "Deployed"
            );
            outcomes.push((definition.clone(), outcome));
        }

        let record = serde_json::json!({
            "target": self.target,
            "rollouts": outcomes
                .iter()
                .map(|(definition, outcome)| serde_json::json!({
                    "definition": definition,
                    "outcome": outcome,
                }))
                .collect::<Vec<_>>(),
        });
        let data = serde_json::to_vec_pretty(&record)?;
        Ok(Some(ctx.put_artifact(ROLLOUT_FILE, data).await?))
    }
}

/// The runner for every executable stage.
#[derive(Clone)]
pub struct StageRunners {
    pub source: Arc<dyn StageRunner>,
    pub build: Arc<dyn StageRunner>,
    pub deploy: Arc<dyn StageRunner>,
}

impl StageRunners {
    pub fn get(&self, stage: StageKind) -> Option<&Arc<dyn StageRunner>> {
        match stage {
            StageKind::Source => Some(&self.source),
            StageKind::Build => Some(&self.build),
            StageKind::Approve => None,
            StageKind::Deploy => Some(&self.deploy),
        }
    }
}
