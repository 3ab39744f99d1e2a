//! KDL configuration parsing for Shipyard.
//!
//! This crate handles parsing of:
//! - Stack definitions (shipyard.kdl): the pipeline, server and artifact store
//! - Variable interpolation in build commands

pub mod error;
pub mod stack;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use stack::{
    ApprovalConfig, ArtifactBackend, ArtifactsConfig, BuildConfig, BuildPhase, ConcurrencyPolicy,
    DeployConfig, PipelineConfig, RegistryConfig, ServerConfig, SourceConfig, StackConfig,
    TagPolicy, load_stack, parse_stack,
};
pub use variables::{
    GitContext, ImageContext, RunContext, VariableContext, VariableContextBuilder,
};
