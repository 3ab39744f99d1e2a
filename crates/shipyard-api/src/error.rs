//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Conflict(String),
    /// The cluster, registry or git host failed us.
    Upstream(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::NotFound(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Conflict(msg)
            | ApiError::Upstream(msg) => msg,
            ApiError::Internal(msg) => {
                error!(error = %msg, "Internal error");
                msg
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<shipyard_core::Error> for ApiError {
    fn from(err: shipyard_core::Error) -> Self {
        use shipyard_core::Error;
        match err {
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::Trigger(_) | Error::InvalidInput(_) => ApiError::BadRequest(err.to_string()),
            Error::InvalidState(_) | Error::Conflict(_) | Error::ApprovalTimeout(_) => {
                ApiError::Conflict(err.to_string())
            }
            Error::Deploy(_) | Error::Source(_) => ApiError::Upstream(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
