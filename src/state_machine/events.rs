use serde::{Deserialize, Serialize};

/// Events that can trigger saga transaction state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    /// Begin executing the first step
    Start,
    /// The last step completed
    Complete,
    /// A step failed permanently
    BeginCompensation,
    /// The reverse sweep visited every completed step
    FinishCompensation,
    /// Timeout or breakdown of the compensation sweep
    Fail(String),
}

impl SagaEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::BeginCompensation => "begin_compensation",
            Self::FinishCompensation => "finish_compensation",
            Self::Fail(_) => "fail",
        }
    }

    /// Extract failure reason if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }
}

/// Events that can trigger saga step state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StepEvent {
    /// Forward invocation handed to the execution engine
    Dispatch,
    Complete,
    Fail(String),
    BeginCompensation,
    CompensationSucceeded,
    CompensationFailed(String),
    /// Saga ended before the step ran
    Skip,
}

impl StepEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Dispatch => "dispatch",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::BeginCompensation => "begin_compensation",
            Self::CompensationSucceeded => "compensation_succeeded",
            Self::CompensationFailed(_) => "compensation_failed",
            Self::Skip => "skip",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) | Self::CompensationFailed(msg) => Some(msg),
            _ => None,
        }
    }

    /// Create a failure event with the given error message
    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }
}
