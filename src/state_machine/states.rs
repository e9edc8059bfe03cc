use serde::{Deserialize, Serialize};
use std::fmt;

/// Saga transaction lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    /// Registered but not yet started
    #[default]
    Created,
    /// Forward steps are being executed
    Running,
    /// A step failed permanently and completed steps are being undone
    Compensating,
    /// Every step completed
    Completed,
    /// The reverse compensation sweep finished
    Compensated,
    /// Timed out, or the compensation sweep itself broke down
    Failed,
}

impl SagaStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Compensated | Self::Failed)
    }

    /// Check if this is an active state (work is in flight or pending)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Compensating)
    }

    /// All terminal states, for registry sweeps
    pub fn terminal_states() -> &'static [SagaStatus] {
        &[Self::Completed, Self::Compensated, Self::Failed]
    }

    /// All active states, for registry sweeps
    pub fn active_states() -> &'static [SagaStatus] {
        &[Self::Running, Self::Compensating]
    }
}

impl fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Compensating => write!(f, "compensating"),
            Self::Completed => write!(f, "completed"),
            Self::Compensated => write!(f, "compensated"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for SagaStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "compensating" => Ok(Self::Compensating),
            "completed" => Ok(Self::Completed),
            "compensated" => Ok(Self::Compensated),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid saga status: {s}")),
        }
    }
}

/// Saga step lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    /// Forward invocation failed; may be redispatched while retries remain
    Failed,
    Compensating,
    Compensated,
    CompensationFailed,
    /// Never ran because the saga ended before reaching it
    Skipped,
}

impl StepStatus {
    /// Terminal from the step's point of view.
    ///
    /// `Completed` and `Failed` are not listed: a completed step can still be
    /// compensated and a failed step can still be retried.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Compensated | Self::CompensationFailed | Self::Skipped
        )
    }

    /// Check if this is an active state (an invocation is in flight)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Compensating)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Compensating => write!(f, "compensating"),
            Self::Compensated => write!(f, "compensated"),
            Self::CompensationFailed => write!(f, "compensation_failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "compensating" => Ok(Self::Compensating),
            "compensated" => Ok(Self::Compensated),
            "compensation_failed" => Ok(Self::CompensationFailed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Invalid step status: {s}")),
        }
    }
}
