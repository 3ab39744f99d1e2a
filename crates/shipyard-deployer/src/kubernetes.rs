//! Kubernetes deployer implementation.
//!
//! A rollout patches the image of one container in a Deployment's pod
//! template; the Deployment controller then replaces pods according to its
//! own rolling-update strategy.

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::Client;
use kube::api::{Api, Patch, PatchParams};
use serde_json::json;
use shipyard_core::deployer::*;
use shipyard_core::descriptor::ImageDefinition;
use shipyard_core::{Error, Result};
use tracing::info;

/// Kubernetes-based deployer.
pub struct KubernetesDeployer {
    client: Client,
}

impl KubernetesDeployer {
    /// Connect using the ambient kubeconfig or in-cluster service account.
    pub async fn new() -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn deployments(&self, target: &DeployTarget) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &target.namespace)
    }

    async fn fetch(&self, target: &DeployTarget) -> Result<Deployment> {
        self.deployments(target)
            .get_opt(&target.service)
            .await
            .map_err(|e| Error::Deploy(format!("failed to read {}: {}", target, e)))?
            .ok_or_else(|| Error::Deploy(format!("service {} no longer exists", target)))
    }
}

/// Images of every container in the pod template.
fn container_images(deployment: &Deployment) -> Vec<ImageDefinition> {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .map(|pod| {
            pod.containers
                .iter()
                .map(|c| ImageDefinition::new(c.name.clone(), c.image.clone().unwrap_or_default()))
                .collect()
        })
        .unwrap_or_default()
}

/// Strategic merge patch setting one container's image.
fn image_patch(container: &str, image: &str) -> serde_json::Value {
    json!({
        "spec": {
            "template": {
                "spec": {
                    "containers": [{ "name": container, "image": image }]
                }
            }
        }
    })
}

fn replica_status(deployment: &Deployment) -> ReplicaStatus {
    let count = |v: Option<i32>| v.unwrap_or(0).max(0) as u32;
    let desired = count(deployment.spec.as_ref().and_then(|s| s.replicas).or(Some(1)));
    let status = deployment.status.clone().unwrap_or_default();
    ReplicaStatus {
        desired,
        updated: count(status.updated_replicas),
        ready: count(status.ready_replicas),
        available: count(status.available_replicas),
    }
}

/// First load-balancer address of a service.
fn load_balancer_endpoint(service: &Service) -> Option<String> {
    service
        .status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?
        .iter()
        .find_map(|ingress| ingress.hostname.clone().or_else(|| ingress.ip.clone()))
}

#[async_trait]
impl Deployer for KubernetesDeployer {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn rollout(&self, request: RolloutRequest) -> Result<RolloutOutcome> {
        request.definition.validate()?;
        let target = &request.target;
        let container = &request.definition.name;
        let image = &request.definition.image_uri;

        let deployment = self.fetch(target).await?;
        let current = container_images(&deployment)
            .into_iter()
            .find(|d| &d.name == container)
            .ok_or_else(|| {
                Error::Deploy(format!("{} has no container named {}", target, container))
            })?;

        if &current.image_uri == image {
            info!(run_id = %request.run_id, %target, %image, "Image unchanged, skipping rollout");
            return Ok(RolloutOutcome::Unchanged);
        }

        self.deployments(target)
            .patch(
                &target.service,
                &PatchParams::default(),
                &Patch::Strategic(image_patch(container, image)),
            )
            .await
            .map_err(|e| Error::Deploy(format!("failed to update {}: {}", target, e)))?;

        info!(
            run_id = %request.run_id,
            %target,
            previous = %current.image_uri,
            %image,
            "Rollout started"
        );
        Ok(RolloutOutcome::Started {
            previous_image: Some(current.image_uri).filter(|i| !i.is_empty()),
        })
    }

    async fn state(&self, target: &DeployTarget) -> Result<DeploymentState> {
        let deployment = self.fetch(target).await?;
        let replicas = replica_status(&deployment);
        Ok(DeploymentState {
            status: replicas.status(),
            replicas,
            images: container_images(&deployment),
            observed_at: Utc::now(),
        })
    }

    async fn endpoint(&self, target: &DeployTarget) -> Result<Option<String>> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), &target.namespace);
        let service = services
            .get_opt(&target.service)
            .await
            .map_err(|e| Error::Deploy(format!("failed to read service {}: {}", target, e)))?;
        Ok(service.as_ref().and_then(load_balancer_endpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment(replicas: i32, updated: i32, available: i32) -> Deployment {
        serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "similarity-embeddings", "namespace": "default" },
            "spec": {
                "replicas": replicas,
                "selector": { "matchLabels": { "app": "similarity-embeddings" } },
                "template": {
                    "metadata": { "labels": { "app": "similarity-embeddings" } },
                    "spec": {
                        "containers": [
                            { "name": "similarity-embeddings-app", "image": "repo:abc1234" },
                            { "name": "sidecar", "image": "envoy:1.30" }
                        ]
                    }
                }
            },
            "status": {
                "replicas": replicas,
                "updatedReplicas": updated,
                "readyReplicas": available,
                "availableReplicas": available
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_container_images() {
        let images = container_images(&deployment(2, 2, 2));
        assert_eq!(
            images,
            vec![
                ImageDefinition::new("similarity-embeddings-app", "repo:abc1234"),
                ImageDefinition::new("sidecar", "envoy:1.30"),
            ]
        );
    }

    #[test]
    fn test_image_patch_targets_one_container() {
        let patch = image_patch("similarity-embeddings-app", "repo:latest");
        let containers = &patch["spec"]["template"]["spec"]["containers"];
        assert_eq!(containers.as_array().unwrap().len(), 1);
        assert_eq!(containers[0]["name"], "similarity-embeddings-app");
        assert_eq!(containers[0]["image"], "repo:latest");
    }

    #[test]
    fn test_replica_status_from_deployment() {
        let rolling = replica_status(&deployment(3, 1, 3));
        assert_eq!(rolling.desired, 3);
        assert_eq!(rolling.updated, 1);
        assert!(matches!(rolling.status(), DeploymentStatus::InProgress { .. }));

        let healthy = replica_status(&deployment(2, 2, 2));
        assert_eq!(healthy.status(), DeploymentStatus::Healthy);
    }

    #[test]
    fn test_load_balancer_endpoint() {
        let service: Service = serde_json::from_value(json!({
            "metadata": { "name": "similarity-embeddings" },
            "status": {
                "loadBalancer": {
                    "ingress": [{ "hostname": "abc.elb.amazonaws.com" }]
                }
            }
        }))
        .unwrap();
        assert_eq!(
            load_balancer_endpoint(&service).as_deref(),
            Some("abc.elb.amazonaws.com")
        );

        let pending: Service =
            serde_json::from_value(json!({ "metadata": { "name": "x" } })).unwrap();
        assert!(load_balancer_endpoint(&pending).is_none());
    }
}

/// Integration tests that require a cluster.
/// Run with: cargo test -- --ignored
#[cfg(test)]
mod integration_tests {
    use super::*;
    use shipyard_core::ResourceId;

    #[tokio::test]
    #[ignore]
    async fn test_missing_deployment_is_a_deploy_error() {
        let deployer = KubernetesDeployer::new().await.unwrap();
        let target = DeployTarget {
            namespace: "default".to_string(),
            service: format!("shipyard-missing-{}", ResourceId::new().short()),
        };
        let err = deployer
            .rollout(RolloutRequest {
                run_id: ResourceId::new(),
                target,
                definition: ImageDefinition::new("app", "repo:latest"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Deploy(_)));
    }
}
