//! Webhook endpoints for Git providers.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use shipyard_core::ResourceId;
use shipyard_core::push::PushEvent;
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/github", post(github_webhook))
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum WebhookOutcome {
    Pong,
    Triggered { run_id: ResourceId, number: u64 },
    Ignored { reason: String },
}

impl WebhookOutcome {
    fn ignored(reason: impl Into<String>) -> Self {
        WebhookOutcome::Ignored {
            reason: reason.into(),
        }
    }
}

/// Handle GitHub webhook events.
async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookOutcome>), ApiError> {
    let event_type = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    let delivery = headers
        .get("X-GitHub-Delivery")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");

    if let Some(secret) = &state.webhook_secret {
        let signature = headers
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok());
        if !verify_github_signature(secret, &body, signature) {
            warn!(event = %event_type, delivery = %delivery, "Invalid webhook signature");
            return Err(ApiError::Unauthorized("invalid signature".to_string()));
        }
    }

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))?;

    info!(event = %event_type, delivery = %delivery, "Received GitHub webhook");

    match event_type {
        "ping" => {
            info!("Ping event received - webhook is configured correctly");
            Ok((StatusCode::OK, Json(WebhookOutcome::Pong)))
        }
        "push" => {
            let push = PushEvent::from_github_payload(&payload)
                .ok_or_else(|| ApiError::BadRequest("malformed push payload".to_string()))?;
            let outcome = handle_push(&state, push).await?;
            let status = match outcome {
                WebhookOutcome::Triggered { .. } => StatusCode::CREATED,
                _ => StatusCode::ACCEPTED,
            };
            Ok((status, Json(outcome)))
        }
        other => Ok((
            StatusCode::ACCEPTED,
            Json(WebhookOutcome::ignored(format!("event {} is not handled", other))),
        )),
    }
}

/// Start a run for a push to the tracked branch of the configured repository.
async fn handle_push(state: &AppState, push: PushEvent) -> Result<WebhookOutcome, ApiError> {
    let source = &state.stack.pipeline.source;
    if !repository_matches(&source.repository, &push.repository_full_name) {
        info!(repo = %push.repository_full_name, "Push for another repository");
        return Ok(WebhookOutcome::ignored(format!(
            "repository {} is not the pipeline source",
            push.repository_full_name
        )));
    }

    let Some(trigger) = push.to_trigger() else {
        info!(git_ref = %push.r#ref, deleted = push.deleted, "Push does not build");
        return Ok(WebhookOutcome::ignored(format!("{} is not a branch update", push.r#ref)));
    };
    if trigger.branch.as_deref() != Some(source.branch.as_str()) {
        info!(branch = ?trigger.branch, tracked = %source.branch, "Push to untracked branch");
        return Ok(WebhookOutcome::ignored(format!(
            "branch {} is not tracked",
            trigger.branch.as_deref().unwrap_or_default()
        )));
    }

    info!(
        repo = %push.repository_full_name,
        branch = %source.branch,
        sha = %push.after,
        pusher = %push.pusher,
        "Processing push event"
    );
    let run = state.orchestrator.trigger(trigger).await?;
    Ok(WebhookOutcome::Triggered {
        run_id: run.id,
        number: run.number,
    })
}

/// Whether a clone URL points at the `owner/name` repository.
fn repository_matches(url: &str, full_name: &str) -> bool {
    let url = url.trim_end_matches('/');
    let url = url.strip_suffix(".git").unwrap_or(url).to_ascii_lowercase();
    let full_name = full_name.to_ascii_lowercase();
    url.ends_with(&format!("/{}", full_name)) || url.ends_with(&format!(":{}", full_name))
}

/// Verify GitHub webhook signature.
fn verify_github_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    // Signature format: "sha256=<hex>"
    let Some(sig_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&sig_bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_signature() {
        let body = br#"{"zen":"Design for failure."}"#;
        let good = sign("s3cret", body);
        assert!(verify_github_signature("s3cret", body, Some(&good)));
        assert!(!verify_github_signature("other", body, Some(&good)));
        assert!(!verify_github_signature("s3cret", b"tampered", Some(&good)));
        assert!(!verify_github_signature("s3cret", body, None));
        assert!(!verify_github_signature("s3cret", body, Some("sha1=abc")));
        assert!(!verify_github_signature("s3cret", body, Some("sha256=zz")));
    }

    #[test]
    fn test_repository_matches() {
        assert!(repository_matches("https://github.com/Owner/Repo.git", "owner/repo"));
        assert!(repository_matches("https://github.com/owner/repo", "owner/repo"));
        assert!(repository_matches("git@github.com:owner/repo.git", "owner/repo"));
        assert!(!repository_matches("https://github.com/owner/repo-two.git", "owner/repo"));
        assert!(!repository_matches("https://github.com/other/repo.git", "owner/repo"));
    }
}
