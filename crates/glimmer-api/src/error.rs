//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

/// Error returned by handlers, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    Internal(glimmer_core::Error),
    NotFound(String),
    BadRequest(String),
    Unavailable(String),
}

impl From<glimmer_core::Error> for ApiError {
    fn from(err: glimmer_core::Error) -> Self {
        match &err {
            glimmer_core::Error::NotFound(msg) => ApiError::NotFound(msg.clone()),
            glimmer_core::Error::JobNotFound(id) => ApiError::NotFound(format!("Job {} not found", id)),
            glimmer_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg.clone()),
            glimmer_core::Error::Job(msg) if msg.contains("shutting down") => {
                ApiError::Unavailable(msg.clone())
            }
            _ => ApiError::Internal(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Internal(err) => {
                error!(subsystem = "api", error = %err, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
