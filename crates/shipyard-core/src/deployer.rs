//! Deployer trait and deployment types.
//!
//! A deployer points a running service at a new container image and lets
//! the underlying orchestrator replace instances. Rollout serialization
//! between concurrent runs is the orchestrator's job, not ours.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::descriptor::ImageDefinition;
use crate::{ResourceId, Result};

/// The running service a pipeline deploys to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployTarget {
    pub namespace: String,
    /// Name of the workload (and of the service fronting it).
    pub service: String,
}

impl std::fmt::Display for DeployTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.service)
    }
}

/// Roll `definition.image_uri` out to the container named `definition.name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutRequest {
    pub run_id: ResourceId,
    pub target: DeployTarget,
    pub definition: ImageDefinition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RolloutOutcome {
    /// The image changed; instances are being replaced.
    Started { previous_image: Option<String> },
    /// The container already runs this image reference.
    Unchanged,
}

/// Current state of a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentState {
    pub status: DeploymentStatus,
    pub replicas: ReplicaStatus,
    /// Images currently configured, one per container.
    pub images: Vec<ImageDefinition>,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Old instances are still being replaced.
    InProgress { updated: u32, desired: u32 },
    Healthy,
    Degraded { message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaStatus {
    pub desired: u32,
    pub updated: u32,
    pub ready: u32,
    pub available: u32,
}

impl ReplicaStatus {
    pub fn status(&self) -> DeploymentStatus {
        if self.updated < self.desired {
            DeploymentStatus::InProgress {
                updated: self.updated,
                desired: self.desired,
            }
        } else if self.available < self.desired {
            DeploymentStatus::Degraded {
                message: format!("{}/{} replicas available", self.available, self.desired),
            }
        } else {
            DeploymentStatus::Healthy
        }
    }
}

/// Trait for deployers.
#[async_trait]
pub trait Deployer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Point the target's container at a new image.
    ///
    /// Fails with [`crate::Error::Deploy`] when the target or its container
    /// does not exist. Re-rolling the current image is a no-op.
    async fn rollout(&self, request: RolloutRequest) -> Result<RolloutOutcome>;

    async fn state(&self, target: &DeployTarget) -> Result<DeploymentState>;

    /// Public address of the service, once the load balancer has one.
    async fn endpoint(&self, target: &DeployTarget) -> Result<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replica_status() {
        let rolling = ReplicaStatus {
            desired: 3,
            updated: 1,
            ready: 3,
            available: 3,
        };
        assert_eq!(
            rolling.status(),
            DeploymentStatus::InProgress {
                updated: 1,
                desired: 3
            }
        );

        let degraded = ReplicaStatus {
            desired: 2,
            updated: 2,
            ready: 1,
            available: 1,
        };
        assert!(matches!(degraded.status(), DeploymentStatus::Degraded { .. }));

        let healthy = ReplicaStatus {
            desired: 1,
            updated: 1,
            ready: 1,
            available: 1,
        };
        assert_eq!(healthy.status(), DeploymentStatus::Healthy);
    }
}
