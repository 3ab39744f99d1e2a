//! Deployment backends for Shipyard.
//!
//! Provides deployer implementations:
//! - Kubernetes: rolls a Deployment's container over to a new image

pub mod kubernetes;

pub use kubernetes::KubernetesDeployer;
pub use shipyard_core::deployer::{
    DeployTarget, Deployer, DeploymentState, DeploymentStatus, ReplicaStatus, RolloutOutcome,
    RolloutRequest,
};
