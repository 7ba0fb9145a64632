//! Request and response bodies of the HTTP API, and the error envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    models::{Job, RunnerInfo, Sandbox},
    ErrorKind, SandplaneError,
};

//--------------------------------------------------------------------------------------------------
// Types: Requests
//--------------------------------------------------------------------------------------------------

/// Query string of `GET /sandboxes`.
#[derive(Debug, Default, Deserialize)]
pub struct ListSandboxesQuery {
    /// Only return sandboxes in this status.
    pub status: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Types: Responses
//--------------------------------------------------------------------------------------------------

/// Body of `POST /sandboxes`.
#[derive(Debug, Serialize)]
pub struct CreateSandboxResponse {
    /// The new sandbox.
    pub sandbox: Sandbox,

    /// The `create` job dispatched for it.
    pub job: Job,
}

/// A single sandbox.
#[derive(Debug, Serialize)]
pub struct SandboxResponse {
    /// The sandbox.
    pub sandbox: Sandbox,
}

/// A list of sandboxes.
#[derive(Debug, Serialize)]
pub struct SandboxListResponse {
    /// The sandboxes, oldest first.
    pub sandboxes: Vec<Sandbox>,
}

/// Body of `DELETE /sandboxes/{id}`.
#[derive(Debug, Serialize)]
pub struct DeleteSandboxResponse {
    /// What the delete did.
    pub outcome: DeleteKind,

    /// The sandbox, while it is being torn down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<Sandbox>,

    /// The unresolved `delete` job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<Job>,
}

/// Result of a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteKind {
    /// A runner is tearing the sandbox down.
    Deleting,

    /// The record was removed immediately.
    Removed,
}

/// Body of `POST /cleanup`.
#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    /// Ids of the purged sandboxes.
    pub purged: Vec<String>,
}

/// A single job.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    /// The job.
    pub job: Job,
}

/// A list of jobs.
#[derive(Debug, Serialize)]
pub struct JobListResponse {
    /// The jobs, oldest first.
    pub jobs: Vec<Job>,
}

/// Body of `POST /jobs/{id}/complete`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteJobResponse {
    /// The finished job.
    pub job: Job,

    /// Whether completing the job removed its sandbox.
    pub sandbox_removed: bool,
}

/// A single runner.
#[derive(Debug, Serialize)]
pub struct RunnerResponse {
    /// The runner.
    pub runner: RunnerInfo,
}

/// A list of runners.
#[derive(Debug, Serialize)]
pub struct RunnerListResponse {
    /// The runners, by id.
    pub runners: Vec<RunnerInfo>,
}

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `ok` when the server answers.
    pub status: &'static str,

    /// Number of sandbox records.
    pub sandboxes: usize,

    /// Number of jobs waiting for a runner.
    pub pending_jobs: usize,

    /// Number of registered runners.
    pub runners: usize,

    /// Seconds since the server started.
    pub uptime_secs: i64,
}

//--------------------------------------------------------------------------------------------------
// Types: Error Response
//--------------------------------------------------------------------------------------------------

/// Standard error response format.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status code.
    pub code: u16,

    /// Error message.
    pub message: String,

    /// Error type for categorizing errors.
    pub error_type: ErrorType,

    /// Optional additional details about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Types of errors that can occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Invalid request parameters or body.
    ValidationError,

    /// Resource not found.
    NotFound,

    /// Ownership or state conflict.
    Conflict,

    /// Missing or invalid credentials.
    AuthenticationError,

    /// Internal server errors.
    InternalError,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(code: u16, message: String, error_type: ErrorType) -> Self {
        Self {
            code,
            message,
            error_type,
            details: None,
        }
    }

    /// Add details to the error response, ignoring details for 500-level errors.
    pub fn with_details(mut self, details: String) -> Self {
        if self.code < 500 {
            self.details = Some(details);
        }
        self
    }

    fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl ErrorType {
    /// The HTTP status this error type is reported with.
    pub fn status(self) -> StatusCode {
        match self {
            ErrorType::ValidationError => StatusCode::BAD_REQUEST,
            ErrorType::NotFound => StatusCode::NOT_FOUND,
            ErrorType::Conflict => StatusCode::CONFLICT,
            ErrorType::AuthenticationError => StatusCode::UNAUTHORIZED,
            ErrorType::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl From<ErrorKind> for ErrorType {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Validation => ErrorType::ValidationError,
            ErrorKind::NotFound => ErrorType::NotFound,
            ErrorKind::Conflict => ErrorType::Conflict,
            ErrorKind::Unauthorized => ErrorType::AuthenticationError,
            ErrorKind::Internal => ErrorType::InternalError,
        }
    }
}

impl From<&SandplaneError> for ErrorResponse {
    fn from(error: &SandplaneError) -> Self {
        let error_type = ErrorType::from(error.kind());
        let code = error_type.status().as_u16();

        match error_type {
            ErrorType::InternalError => {
                ErrorResponse::new(code, "internal server error".to_string(), error_type)
            }
            _ => ErrorResponse::new(code, error.to_string(), error_type),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl IntoResponse for SandplaneError {
    fn into_response(self) -> Response {
        if self.kind() == ErrorKind::Internal {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        ErrorResponse::from(&self).into_response()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
