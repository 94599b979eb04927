//! Error types for the broadcaster HTTP API.
//!
//! [`ApiError`] unifies the request-path failure modes into a single enum
//! that converts into an Axum HTTP response. Store errors map onto the
//! taxonomy rather than leaking backend detail: a collision is a conflict,
//! a missing row is not-found, anything else is a 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cadence_store::StoreError;

/// Errors that can occur in the HTTP API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request was malformed. Never retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The resource already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A store operation failed after retries.
    #[error("store error: {0}")]
    Store(StoreError),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::AlreadyExists(what) => Self::Conflict(what),
            StoreError::NotFound(what) => Self::NotFound(what),
            other => Self::Store(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            Self::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("store error: {e}")),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
