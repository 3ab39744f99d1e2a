//! Error types for Shipyard.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed trigger event or an untracked branch.
    #[error("invalid trigger: {0}")]
    Trigger(String),

    /// A build command exited non-zero or the build could not run.
    #[error("build failed: {0}")]
    Build(String),

    /// The approval gate deadline passed without a decision.
    #[error("approval timed out: {0}")]
    ApprovalTimeout(String),

    /// Operation is not allowed in the run's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Malformed deployment descriptor or missing target service.
    #[error("deploy failed: {0}")]
    Deploy(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("source fetch failed: {0}")]
    Source(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("serialization: {}", err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
