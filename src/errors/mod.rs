//! Error handling module for the consent backend.
//!
//! `ConsentError` is the consent subsystem's internal taxonomy; none of it ever
//! reaches a visitor. `AppError` maps request-level failures to HTTP status codes
//! and response envelopes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Error codes as constants to avoid stringly-typed errors.
pub mod codes {
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
}

/// Failures inside the consent subsystem. All of them are recovered locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentError {
    /// Durable storage threw, timed out or is missing
    StorageUnavailable(String),
    /// Stored record failed to parse or to validate
    MalformedRecord(String),
    /// Stored record was written under another policy version
    VersionMismatch { stored: String, current: String },
    /// Targeted third-party integration is not present
    IntegrationAbsent(String),
}

impl std::fmt::Display for ConsentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsentError::StorageUnavailable(msg) => write!(f, "storage unavailable: {}", msg),
            ConsentError::MalformedRecord(msg) => write!(f, "malformed consent record: {}", msg),
            ConsentError::VersionMismatch { stored, current } => write!(
                f,
                "consent policy version mismatch: stored {}, current {}",
                stored, current
            ),
            ConsentError::IntegrationAbsent(name) => write!(f, "integration absent: {}", name),
        }
    }
}

impl std::error::Error for ConsentError {}

impl From<sqlx::Error> for ConsentError {
    fn from(err: sqlx::Error) -> Self {
        ConsentError::StorageUnavailable(format!("Database error: {}", err))
    }
}

impl From<serde_json::Error> for ConsentError {
    fn from(err: serde_json::Error) -> Self {
        ConsentError::MalformedRecord(err.to_string())
    }
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    /// Resource not found
    NotFound(String),
    /// Validation error
    Validation(String),
    /// Bad request
    BadRequest(String),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => codes::NOT_FOUND,
            AppError::Validation(_) => codes::VALIDATION_ERROR,
            AppError::BadRequest(_) => codes::BAD_REQUEST,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        match self {
            AppError::NotFound(msg) => msg.clone(),
            AppError::Validation(msg) => msg.clone(),
            AppError::BadRequest(msg) => msg.clone(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for AppError {}

impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        tracing::debug!("Rejected JSON body: {}", rejection);
        AppError::BadRequest(rejection.body_text())
    }
}

/// Error details in the response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

/// Error response envelope.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetails,
    pub revision_id: i64,
}

impl ErrorResponse {
    pub fn new(error: &AppError, revision_id: i64) -> Self {
        Self {
            success: false,
            error: ErrorDetails {
                code: error.error_code().to_string(),
                message: error.message(),
            },
            revision_id,
        }
    }
}

/// Wrapper type for errors that carry the current record timestamp.
pub struct AppErrorWithRevision {
    pub error: AppError,
    pub revision_id: i64,
}

impl IntoResponse for AppErrorWithRevision {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        let body = ErrorResponse::new(&self.error, self.revision_id);
        (status, Json(body)).into_response()
    }
}
