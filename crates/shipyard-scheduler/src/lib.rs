//! Pipeline orchestration for Shipyard.
//!
//! Runs move through `source -> build -> approve -> deploy`; each
//! executable stage runs as its own task and reports back to the
//! [`PipelineOrchestrator`], which persists the run and starts what comes
//! next.

pub mod artifacts;
pub mod events;
pub mod orchestrator;
pub mod stages;
pub mod store;

pub use artifacts::{FsArtifactStore, MemoryArtifactStore};
pub use events::PipelineEvent;
pub use orchestrator::{PipelineOrchestrator, PipelineSettings};
pub use stages::{
    BuildStage, DeployStage, SourceStage, StageContext, StageRunner, StageRunners,
};
pub use store::MemoryRunStore;
