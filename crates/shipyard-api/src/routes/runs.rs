//! Pipeline run endpoints.

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use shipyard_core::ResourceId;
use shipyard_core::artifact::{ArtifactRef, PruneStats};
use shipyard_core::pipeline::{ApprovalDecision, Decision, PipelineRun, StageKind, TriggerEvent};
use tracing::info;

use crate::AppState;
use crate::error::ApiError;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_runs).post(create_run))
        .route("/{id}", get(get_run).delete(delete_run))
        .route("/{id}/approval", post(decide))
        .route("/{id}/retry", post(retry_run))
        .route("/{id}/artifacts", get(list_artifacts))
        .route("/{id}/artifacts/{stage}/{name}", get(get_artifact))
}

#[derive(Debug, Deserialize)]
struct ListRunsQuery {
    limit: Option<usize>,
}

async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<Vec<PipelineRun>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    Ok(Json(state.orchestrator.list(limit).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TriggerRunRequest {
    branch: Option<String>,
    revision: Option<String>,
    actor: Option<String>,
}

/// Manually start a run of the tracked branch.
async fn create_run(
    State(state): State<AppState>,
    body: Option<Json<TriggerRunRequest>>,
) -> Result<(StatusCode, Json<PipelineRun>), ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let mut event = TriggerEvent::manual(req.actor);
    if let Some(branch) = req.branch {
        event = event.with_branch(branch);
    }
    if let Some(revision) = req.revision {
        event = event.with_revision(revision);
    }
    let run = state.orchestrator.trigger(event).await?;
    Ok((StatusCode::CREATED, Json(run)))
}

async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
) -> Result<Json<PipelineRun>, ApiError> {
    Ok(Json(state.orchestrator.get(id).await?))
}

/// Remove a finished run and its artifacts.
async fn delete_run(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
) -> Result<Json<PruneStats>, ApiError> {
    Ok(Json(state.orchestrator.delete(id).await?))
}

#[derive(Debug, Deserialize)]
struct ApprovalRequest {
    decision: Decision,
    actor: String,
    comment: Option<String>,
}

async fn decide(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
    Json(req): Json<ApprovalRequest>,
) -> Result<Json<PipelineRun>, ApiError> {
    if req.actor.trim().is_empty() {
        return Err(ApiError::BadRequest("actor is required".to_string()));
    }
    let mut decision = ApprovalDecision::new(req.actor, req.decision);
    if let Some(comment) = req.comment {
        decision = decision.with_comment(comment);
    }
    info!(run_id = %id, actor = %decision.actor, decision = ?decision.decision, "Approval decision");
    Ok(Json(state.orchestrator.decide(id, decision).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RetryRequest {
    actor: Option<String>,
}

/// Start a new run on the revision a finished run built.
async fn retry_run(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
    body: Option<Json<RetryRequest>>,
) -> Result<(StatusCode, Json<PipelineRun>), ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let run = state.orchestrator.retry(id, req.actor).await?;
    Ok((StatusCode::CREATED, Json(run)))
}

async fn list_artifacts(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
) -> Result<Json<Vec<ArtifactRef>>, ApiError> {
    Ok(Json(state.orchestrator.artifacts(id).await?))
}

async fn get_artifact(
    State(state): State<AppState>,
    Path((id, stage, name)): Path<(ResourceId, StageKind, String)>,
) -> Result<Response, ApiError> {
    let (reference, data) = state.orchestrator.read_artifact(id, stage, &name).await?;
    let content_type = if name.ends_with(".json") {
        "application/json"
    } else {
        "application/octet-stream"
    };
    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::ETAG, format!("\"{}\"", reference.checksum)),
        ],
        data,
    )
        .into_response())
}
