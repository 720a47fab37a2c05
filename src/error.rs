//! Error types for stemsep.
//!
//! `Error` is the crate-wide error used by the engine, store and clients;
//! `ApiError` is the HTTP-facing error that maps onto status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the pipeline core.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing configuration (fatal at startup)
    #[error("configuration error: {0}")]
    Config(String),

    /// Database failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Transport-level failure talking to the catalog API
    #[error("catalog request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Catalog API returned an unusable response
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Fetcher subprocess failed or produced malformed output
    #[error("fetcher error: {0}")]
    Fetcher(String),

    /// Separator subprocess or its container runtime failed
    #[error("separator error: {0}")]
    Separator(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// API error type returned by gateway handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
