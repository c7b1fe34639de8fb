//! # Error Handling
//!
//! This module defines the HTTP-facing error type and how it's converted to
//! responses. Lower layers use their own typed errors ([`JobError`],
//! [`ArtifactError`]); `From` impls translate them here so handlers can use `?`.
//!
//! ## HTTP Status Code Mapping:
//! - BadRequest/ValidationError → 400
//! - NotFound → 404
//! - Conflict → 409 (a job whose source file was already consumed)
//! - Worker/Internal/ConfigError → 500
//!
//! ## JSON Response Format:
//! ```json
//! {
//!   "success": false,
//!   "error": "Whisper process failed with exit code 2: model not found",
//!   "type": "worker_error",
//!   "timestamp": "2025-01-01T12:00:00Z"
//! }
//! ```

use crate::artifacts::ArtifactError;
use crate::transcription::JobError;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (I/O failures, task panics, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// The request conflicts with the current state of a resource
    Conflict(String),

    /// The transcription worker could not be run or failed
    Worker(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.as_str()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.as_str()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.as_str()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.as_str()),
            AppError::Worker(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "worker_error", msg.as_str()),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg.as_str()),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.as_str()),
        }
    }

    /// The message shown to API clients.
    pub fn message(&self) -> &str {
        self.parts().2
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::Worker(msg) => write!(f, "Worker error: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.parts().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.parts();

        HttpResponse::build(status).json(json!({
            "success": false,
            "error": message,
            "type": error_type,
            "timestamp": chrono::Utc::now().to_rfc3339()
        }))
    }
}

/// Job failures keep the worker's own diagnostic text in the message.
impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::SourceUnavailable(_) => AppError::Conflict(err.to_string()),
            JobError::OutputDirectory { .. } | JobError::Supervision(_) => {
                AppError::Internal(err.to_string())
            }
            JobError::WorkerLaunch { .. }
            | JobError::WorkerExecution { .. }
            | JobError::WorkerTimeout(_)
            | JobError::Cancelled => AppError::Worker(err.to_string()),
        }
    }
}

/// Rejected names look exactly like missing files to the client.
impl From<ArtifactError> for AppError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::InvalidName(_) | ArtifactError::NotFound(_) => {
                AppError::NotFound("File not found".to_string())
            }
            ArtifactError::Io { .. } => {
                tracing::error!("Download error: {}", err);
                AppError::Internal("Failed to download file".to_string())
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
