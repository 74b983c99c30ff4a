//! Crate-wide error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors inside the task-execution core. Subprocess failures are NOT in
/// here: the runner reports them as a `RunOutcome::Error` and the task loop
/// carries on with the next iteration.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("total_iterations must be at least 1 (got {0})")]
    InvalidIterations(u32),

    #[error("cancellation store: {0}")]
    Store(#[from] rusqlite::Error),
}

/// HTTP-facing error: a status code plus the `{"message": ...}` JSON body
/// every non-2xx response carries.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "message": self.message }))).into_response()
    }
}
