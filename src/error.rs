//! Common error types for the dispatch layer

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// The registry has no live generation server, even after discovery
    #[error("No generation servers available")]
    NoServersAvailable,

    /// A single backend call failed
    #[error("Backend error: {0}")]
    BackendError(String),

    /// Every attempt against the backend failed
    #[error("Backend unavailable after {attempts} attempt(s): {last_error}")]
    BackendUnavailable { attempts: u32, last_error: String },

    #[error("Post-processing failed: {0}")]
    PostProcess(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// A failure produced by a deduplicated build and handed to every waiter
    #[error(transparent)]
    Shared(Arc<AppError>),
}

impl AppError {
    /// Unwrap shared errors down to the one that actually happened
    pub fn root(&self) -> &AppError {
        match self {
            AppError::Shared(inner) => inner.root(),
            other => other,
        }
    }

    fn classify(&self) -> (StatusCode, &'static str, Option<&'static str>) {
        match self.root() {
            AppError::Config(_) | AppError::Io(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None)
            }
            AppError::Json(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", Some("invalid_json")),
            AppError::HttpClient(_) => (StatusCode::BAD_GATEWAY, "backend_error", None),
            AppError::BackendError(_) => (StatusCode::BAD_GATEWAY, "backend_error", None),
            AppError::NoServersAvailable => (StatusCode::SERVICE_UNAVAILABLE, "server_error", Some("no_servers_available")),
            AppError::BackendUnavailable { .. } => (StatusCode::BAD_GATEWAY, "backend_error", Some("backend_unavailable")),
            AppError::PostProcess(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", Some("post_process_failed")),
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", None),
            AppError::Shared(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
        }
    }
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = self.classify();

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: error_type.to_string(),
                code: code.map(|c| c.to_string()),
            },
        });

        (status, body).into_response()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
