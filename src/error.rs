//! Error types for the saga engine.
//!

use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigurationError;
use crate::state_machine::StateMachineError;

/// Crate-wide error taxonomy.
///
/// Coordinator operations return these as values; nothing here is ever raised
/// from inside a worker or scheduler task.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SagaError {
    /// Malformed create/start request, rejected before any mutation
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Saga {0} not found")]
    NotFound(Uuid),

    /// Operation is not valid for the current status of the saga or step
    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("Invocation error: {0}")]
    Invocation(#[from] InvocationError),

    #[error("Compensation failed for step {step}: {reason}")]
    Compensation { step: String, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Execution engine is shut down")]
    Shutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure modes of a forward or compensating invocation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationError {
    #[error("Invocation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Remote call failed (status {status_code:?}): {message}")]
    RemoteFailure {
        status_code: Option<u16>,
        message: String,
    },

    #[error("Unknown service: {service}")]
    UnknownService { service: String },

    #[error("Handler failed: {message}")]
    HandlerFailed { message: String },

    #[error("Invocation cancelled")]
    Cancelled,
}

impl InvocationError {
    /// Short machine-readable tag, recorded on failed invocation results
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::RemoteFailure { .. } => "remote_failure",
            Self::UnknownService { .. } => "unknown_service",
            Self::HandlerFailed { .. } => "handler_failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::RemoteFailure { status_code, .. } => *status_code,
            _ => None,
        }
    }
}

impl From<StateMachineError> for SagaError {
    fn from(err: StateMachineError) -> Self {
        SagaError::StateConflict(err.to_string())
    }
}

impl From<ConfigurationError> for SagaError {
    fn from(err: ConfigurationError) -> Self {
        SagaError::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for SagaError {
    fn from(err: serde_json::Error) -> Self {
        SagaError::Internal(format!("JSON serialization error: {err}"))
    }
}

pub type SagaResult<T> = Result<T, SagaError>;

/// Helper for validation failures
pub fn validation_error(msg: impl Into<String>) -> SagaError {
    SagaError::Validation(msg.into())
}

/// Helper for state conflicts
pub fn state_conflict(msg: impl Into<String>) -> SagaError {
    SagaError::StateConflict(msg.into())
}
