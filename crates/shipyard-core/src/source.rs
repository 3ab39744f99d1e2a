//! Source host abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// File name of the source stage's output artifact.
pub const SOURCE_MANIFEST_FILE: &str = "source.json";

/// A branch pinned to one revision; the source stage's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceManifest {
    /// Clone URL of the repository.
    pub repository: String,
    pub branch: String,
    /// Full commit SHA every later stage builds from.
    pub revision: String,
    pub fetched_at: DateTime<Utc>,
}

impl SourceManifest {
    pub fn short_revision(&self) -> &str {
        &self.revision[..self.revision.len().min(7)]
    }
}

/// A version-controlled repository the pipeline builds from.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pin `branch` to `revision`, or to the branch head when `revision` is
    /// `None`.
    async fn resolve(&self, branch: &str, revision: Option<&str>) -> Result<SourceManifest>;
}
