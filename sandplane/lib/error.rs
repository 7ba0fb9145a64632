use std::{
    error::Error,
    fmt::{self, Display},
};
use thiserror::Error;

use crate::models::{JobStatus, SandboxStatus};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a sandplane-related operation.
pub type SandplaneResult<T> = Result<T, SandplaneError>;

/// An error that occurred while handling a control plane operation.
#[derive(Debug, Error)]
pub enum SandplaneError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),

    /// A JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A TOML configuration could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// An error that occurred when a join handle returned an error.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    /// A request was missing a required field or carried a malformed one.
    #[error("validation error: {0}")]
    Validation(String),

    /// The configuration is invalid.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// No sandbox with the given id exists.
    #[error("sandbox not found: {0}")]
    SandboxNotFound(String),

    /// No job with the given id exists.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// A runner tried to manage a sandbox that is bound to another runner.
    #[error("sandbox {sandbox_id} is owned by runner {owner}, not {caller}")]
    OwnershipConflict {
        /// The sandbox being updated.
        sandbox_id: String,

        /// The runner the sandbox is bound to.
        owner: String,

        /// The runner that issued the update.
        caller: String,
    },

    /// A runner tried to finish a job that is bound to another runner.
    #[error("job {job_id} is owned by runner {owner}, not {caller}")]
    JobOwnershipConflict {
        /// The job being completed.
        job_id: String,

        /// The runner the job is bound to.
        owner: String,

        /// The runner that issued the completion.
        caller: String,
    },

    /// The requested sandbox status change is not allowed.
    #[error("sandbox {sandbox_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The sandbox being updated.
        sandbox_id: String,

        /// The current status.
        from: SandboxStatus,

        /// The requested status.
        to: SandboxStatus,
    },

    /// The job is not in a state that allows the requested operation.
    #[error("job {job_id} is {status}: {reason}")]
    InvalidJobState {
        /// The job being operated on.
        job_id: String,

        /// The job's current status.
        status: JobStatus,

        /// Why the operation was refused.
        reason: String,
    },

    /// The sandbox has no reachable address yet.
    #[error("sandbox not connectable: {0}")]
    NotConnectable(String),

    /// The caller failed API key authentication.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

/// Coarse classification of [`SandplaneError`]s, used to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed input; nothing was mutated.
    Validation,

    /// Unknown sandbox, job or key id.
    NotFound,

    /// Ownership or state conflict the caller is expected to react to.
    Conflict,

    /// Authentication failed.
    Unauthorized,

    /// Unexpected failure inside the control plane.
    Internal,
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SandplaneError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> SandplaneError {
        SandplaneError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Returns the category this error falls into.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SandplaneError::Validation(_) | SandplaneError::InvalidConfig(_) => {
                ErrorKind::Validation
            }
            SandplaneError::SandboxNotFound(_) | SandplaneError::JobNotFound(_) => {
                ErrorKind::NotFound
            }
            SandplaneError::OwnershipConflict { .. }
            | SandplaneError::JobOwnershipConflict { .. }
            | SandplaneError::InvalidTransition { .. }
            | SandplaneError::InvalidJobState { .. }
            | SandplaneError::NotConnectable(_) => ErrorKind::Conflict,
            SandplaneError::Unauthorized(_) => ErrorKind::Unauthorized,
            SandplaneError::Io(_)
            | SandplaneError::Custom(_)
            | SandplaneError::Json(_)
            | SandplaneError::ConfigParse(_)
            | SandplaneError::JoinError(_) => ErrorKind::Internal,
        }
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `SandplaneResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> SandplaneResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
