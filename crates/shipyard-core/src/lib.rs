//! Core domain types and traits for the Shipyard delivery pipeline.
//!
//! This crate contains:
//! - Resource identifiers and the error taxonomy
//! - The pipeline run state machine (source, build, approve, deploy)
//! - Artifact and deployment descriptor types
//! - Collaborator traits: executors, deployers, source providers,
//!   artifact/run stores and secrets

pub mod artifact;
pub mod deployer;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod id;
pub mod pipeline;
pub mod push;
pub mod secret;
pub mod source;
pub mod store;

pub use error::{Error, Result};
pub use id::ResourceId;
