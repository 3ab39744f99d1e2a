//! Run persistence abstraction.

use async_trait::async_trait;

use crate::pipeline::{PipelineRun, RunStatus};
use crate::{ResourceId, Result};

/// Storage for pipeline runs.
///
/// Runs are never removed implicitly; a finished run stays queryable until
/// [`RunStore::delete`] is called.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Allocate the next run number.
    async fn next_number(&self) -> Result<u64>;

    async fn insert(&self, run: &PipelineRun) -> Result<()>;

    async fn get(&self, id: ResourceId) -> Result<PipelineRun>;

    /// Overwrite a stored run with its new state.
    async fn save(&self, run: &PipelineRun) -> Result<()>;

    /// Most recent runs first.
    async fn list(&self, limit: usize) -> Result<Vec<PipelineRun>>;

    async fn list_by_status(&self, status: RunStatus) -> Result<Vec<PipelineRun>>;

    async fn delete(&self, id: ResourceId) -> Result<()>;
}
