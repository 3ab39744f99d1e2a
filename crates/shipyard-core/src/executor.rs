//! Executor trait and job types.
//!
//! Executors run build jobs in isolated environments (containers).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::{ResourceId, Result};

/// Specification for a job to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: ResourceId,
    /// Container image to run.
    pub image: String,
    /// Command to execute.
    pub command: Vec<String>,
    /// Working directory inside the container.
    pub working_dir: Option<String>,
    pub env: HashMap<String, String>,
    /// Maximum execution time.
    pub timeout: Option<Duration>,
    pub volumes: Vec<VolumeMount>,
    /// Git repository to clone before running commands.
    pub git_clone: Option<GitCloneSpec>,
    /// Run with extended privileges (needed to build images inside the job).
    pub privileged: bool,
}

/// Specification for cloning a git repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitCloneSpec {
    pub url: String,
    pub branch: Option<String>,
    /// Specific commit SHA to checkout.
    pub sha: Option<String>,
    /// Directory to clone into.
    pub target_dir: String,
    /// Depth for shallow clone (None for full clone).
    pub depth: Option<u32>,
    /// Access token for private repos.
    pub access_token: Option<String>,
}

/// A volume mount specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Host path or volume name.
    pub name: String,
    pub mount_path: String,
    pub read_only: bool,
}

/// Handle to a running or completed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: ResourceId,
    /// Executor-specific identifier (e.g. container ID).
    pub executor_id: String,
    pub executor_name: String,
    /// Limit carried over from [`JobSpec::timeout`].
    pub timeout: Option<Duration>,
}

/// Status of a job execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running {
        started_at: DateTime<Utc>,
    },
    Succeeded {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },
    Failed {
        started_at: Option<DateTime<Utc>>,
        finished_at: DateTime<Utc>,
        exit_code: Option<i32>,
        message: String,
    },
    Cancelled {
        started_at: Option<DateTime<Utc>>,
        cancelled_at: DateTime<Utc>,
    },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded { .. } | JobStatus::Failed { .. } | JobStatus::Cancelled { .. }
        )
    }
}

/// Result of a completed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub status: JobStatus,
    pub exit_code: Option<i32>,
}

/// A line of log output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
    System,
}

/// Trait for job executors.
#[async_trait]
pub trait Executor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Spawn a new job.
    async fn spawn(&self, spec: JobSpec) -> Result<JobHandle>;

    /// Stream log lines from a job.
    async fn logs(&self, handle: &JobHandle) -> Result<BoxStream<'static, LogLine>>;

    async fn status(&self, handle: &JobHandle) -> Result<JobStatus>;

    /// Wait for a job to complete.
    async fn wait(&self, handle: &JobHandle) -> Result<JobResult>;

    /// Stop and remove a job.
    async fn cancel(&self, handle: &JobHandle) -> Result<()>;

    /// Release whatever a finished job still holds (containers, volumes).
    async fn cleanup(&self, _handle: &JobHandle) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(
            !JobStatus::Running {
                started_at: Utc::now()
            }
            .is_terminal()
        );
        assert!(
            JobStatus::Failed {
                started_at: None,
                finished_at: Utc::now(),
                exit_code: Some(1),
                message: String::new(),
            }
            .is_terminal()
        );
    }
}
