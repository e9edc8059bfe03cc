//! Messages flowing between the coordinator, the execution engine and the
//! worker pool.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::invocation::ActionPayload;
use crate::models::{SagaStep, ServiceInvocationResult};

/// Identity of in-flight work: at most one execution per key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionKey {
    pub saga_id: Uuid,
    pub step_name: String,
}

impl ExecutionKey {
    pub fn new(saga_id: Uuid, step_name: impl Into<String>) -> Self {
        Self {
            saga_id,
            step_name: step_name.into(),
        }
    }
}

impl fmt::Display for ExecutionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.saga_id, self.step_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    Forward,
    Compensation,
}

impl fmt::Display for ExecutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Compensation => write!(f, "compensation"),
        }
    }
}

/// What to call for one forward or compensating execution
#[derive(Debug, Clone, PartialEq)]
pub struct StepInvocation {
    pub saga_id: Uuid,
    pub step_name: String,
    pub service: String,
    pub action: String,
    pub parameters: ActionPayload,
    pub timeout: Duration,
}

impl StepInvocation {
    /// The step's forward action with its input parameters
    pub fn forward(saga_id: Uuid, step: &SagaStep) -> Self {
        Self {
            saga_id,
            step_name: step.name.clone(),
            service: step.target_service.clone(),
            action: step.action.clone(),
            parameters: step.input_parameters.clone(),
            timeout: step.timeout(),
        }
    }

    /// The step's compensating action, if it has a resolvable target
    pub fn compensation(saga_id: Uuid, step: &SagaStep) -> Option<Self> {
        let (service, action) = step.compensation_target()?;
        Some(Self {
            saga_id,
            step_name: step.name.clone(),
            service,
            action,
            parameters: step.compensation_parameters(),
            timeout: step.compensation_timeout(),
        })
    }

    pub fn key(&self) -> ExecutionKey {
        ExecutionKey::new(self.saga_id, self.step_name.clone())
    }
}

/// Worker pool input
#[derive(Debug)]
pub struct DispatchMessage {
    pub execution_id: Uuid,
    pub kind: ExecutionKind,
    pub invocation: StepInvocation,
    /// Resolves when the in-flight record is dropped (cancel, timeout, shutdown)
    pub cancelled: oneshot::Receiver<()>,
}

/// Coordinator loop input
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StepFinished {
        saga_id: Uuid,
        step_name: String,
        result: ServiceInvocationResult,
    },
    CompensationFinished {
        saga_id: Uuid,
        step_name: String,
        result: ServiceInvocationResult,
    },
    /// Backoff elapsed; re-dispatch the failed step
    RetryDue { saga_id: Uuid, step_name: String },
    /// Delay elapsed; dispatch the step's compensation
    CompensationDue { saga_id: Uuid, step_name: String },
}

impl EngineEvent {
    pub fn finished(
        kind: ExecutionKind,
        key: ExecutionKey,
        result: ServiceInvocationResult,
    ) -> Self {
        match kind {
            ExecutionKind::Forward => Self::StepFinished {
                saga_id: key.saga_id,
                step_name: key.step_name,
                result,
            },
            ExecutionKind::Compensation => Self::CompensationFinished {
                saga_id: key.saga_id,
                step_name: key.step_name,
                result,
            },
        }
    }

    pub fn saga_id(&self) -> Uuid {
        match self {
            Self::StepFinished { saga_id, .. }
            | Self::CompensationFinished { saga_id, .. }
            | Self::RetryDue { saga_id, .. }
            | Self::CompensationDue { saga_id, .. } => *saga_id,
        }
    }

    pub fn step_name(&self) -> &str {
        match self {
            Self::StepFinished { step_name, .. }
            | Self::CompensationFinished { step_name, .. }
            | Self::RetryDue { step_name, .. }
            | Self::CompensationDue { step_name, .. } => step_name,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StepFinished { .. } => "step_finished",
            Self::CompensationFinished { .. } => "compensation_finished",
            Self::RetryDue { .. } => "retry_due",
            Self::CompensationDue { .. } => "compensation_due",
        }
    }
}
