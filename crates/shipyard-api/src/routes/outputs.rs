//! Stack outputs: where the pipeline pushes and where the service answers.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use shipyard_core::deployer::{DeployTarget, DeploymentState};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/outputs", get(outputs))
}

#[derive(Debug, Serialize)]
struct StackOutputs {
    pipeline: String,
    image_repository: String,
    target: DeployTarget,
    /// Public endpoint of the service's load balancer, once it has one.
    endpoint: Option<String>,
    deployment: DeploymentState,
}

async fn outputs(State(state): State<AppState>) -> Result<Json<StackOutputs>, ApiError> {
    let target = state.deploy_target();
    let deployment = state.deployer.state(&target).await?;
    let endpoint = state.deployer.endpoint(&target).await?;

    Ok(Json(StackOutputs {
        pipeline: state.stack.pipeline.name.clone(),
        image_repository: state.stack.pipeline.registry.repository.clone(),
        target,
        endpoint,
        deployment,
    }))
}
