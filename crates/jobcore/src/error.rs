//! The error taxonomy shared by the store, manager, registry, and pipeline.
//!
//! Every fallible operation in this crate returns a [`CoreError`] rather
//! than panicking or throwing; cancellation is a variant, not a signal
//! that bypasses the `Result` boundary.

use std::fmt;

/// Stable machine-readable error codes, matching the taxonomy in the
/// storage/manager/handler contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidJob,
    InvalidJobId,
    ValidationError,
    JobNotFound,
    JobUpdateConflict,
    JobCreateFailed,
    JobStoreError,
    OperationCancelled,
    RecoveryExhausted,
    HandlerError,
    DeserializationError,
    ProgrammingError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidJob => "INVALID_JOB",
            ErrorCode::InvalidJobId => "INVALID_JOB_ID",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::JobNotFound => "JOB_NOT_FOUND",
            ErrorCode::JobUpdateConflict => "JOB_UPDATE_CONFLICT",
            ErrorCode::JobCreateFailed => "JOB_CREATE_FAILED",
            ErrorCode::JobStoreError => "JOB_STORE_ERROR",
            ErrorCode::OperationCancelled => "OPERATION_CANCELLED",
            ErrorCode::RecoveryExhausted => "RECOVERY_EXHAUSTED",
            ErrorCode::HandlerError => "HANDLER_ERROR",
            ErrorCode::DeserializationError => "DESERIALIZATION_ERROR",
            ErrorCode::ProgrammingError => "PROGRAMMING_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured error record: `{code, message, cause}`.
///
/// This is the one error type that crosses every public boundary in the
/// crate. It never wraps a panic — dispatch catches those at the seam
/// (see [`crate::registry`]) and turns them into a `HandlerError` variant
/// before this type ever sees them.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct CoreError {
    pub code: ErrorCode,
    pub message: String,
    #[source]
    pub cause: Option<Box<CoreError>>,
}

impl CoreError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: CoreError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn invalid_job(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidJob, message)
    }

    pub fn invalid_job_id(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidJobId, message)
    }

    pub fn job_not_found(id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::JobNotFound, format!("job {id} not found"))
    }

    pub fn update_conflict(id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::JobUpdateConflict,
            format!("concurrent modification of job {id}"),
        )
    }

    pub fn store_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::JobStoreError, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::OperationCancelled, "operation cancelled")
    }

    pub fn recovery_exhausted(id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::RecoveryExhausted,
            format!("job {id} exceeded max retries while stuck in progress"),
        )
    }

    /// A disallowed state transition: a programming error that must fail
    /// loudly rather than silently coerce to some nearby legal state.
    pub fn programming_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProgrammingError, message)
    }

    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DeserializationError, message)
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::HandlerError, message)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
