use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::compensation::{CompensationAction, CompensationStrategy};
use crate::config::SagaDefaultsConfig;
use crate::constants::system::{DEFAULT_MAX_RETRIES, DEFAULT_STEP_TIMEOUT_MS};
use crate::state_machine::{StateMachineResult, StepEvent, StepStateMachine, StepStatus};

/// One ordered unit of work within a saga
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStep {
    pub name: String,
    pub order: u32,
    pub target_service: String,
    /// Forward action name
    pub action: String,
    pub compensation_action: Option<String>,
    pub status: StepStatus,
    pub input_parameters: HashMap<String, Value>,
    pub output_result: Option<HashMap<String, Value>>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_ms: u64,
    pub compensable: bool,
    pub async_execution: bool,
    pub priority: i32,
    pub compensation_policy: Option<CompensationAction>,
    pub manual_compensation_required: bool,
    /// Forward invocations dispatched so far, retries included
    pub invocation_attempts: u32,
    pub compensation_attempts: u32,
    pub execution_time_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub compensated_at: Option<DateTime<Utc>>,
}

impl SagaStep {
    /// Create a pending step calling `target_service.action`
    pub fn new(
        name: impl Into<String>,
        target_service: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            order: 0,
            target_service: target_service.into(),
            action: action.into(),
            compensation_action: None,
            status: StepStatus::Pending,
            input_parameters: HashMap::new(),
            output_result: None,
            error_message: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            compensable: true,
            async_execution: true,
            priority: 0,
            compensation_policy: None,
            manual_compensation_required: false,
            invocation_attempts: 0,
            compensation_attempts: 0,
            execution_time_ms: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            failed_at: None,
            compensated_at: None,
        }
    }

    pub fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }

    pub fn with_compensation(mut self, compensation_action: impl Into<String>) -> Self {
        self.compensation_action = Some(compensation_action.into());
        self
    }

    pub fn with_compensation_policy(mut self, policy: CompensationAction) -> Self {
        self.compensation_policy = Some(policy);
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.input_parameters.insert(key.into(), value);
        self
    }

    pub fn with_inputs(mut self, parameters: HashMap<String, Value>) -> Self {
        self.input_parameters.extend(parameters);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_async(mut self, async_execution: bool) -> Self {
        self.async_execution = async_execution;
        self
    }

    /// Apply the configured step timeout and retry budget
    pub fn with_defaults(mut self, defaults: &SagaDefaultsConfig) -> Self {
        self.timeout_ms = defaults.default_step_timeout_ms;
        self.max_retries = defaults.default_max_retries;
        self
    }

    pub fn non_compensable(mut self) -> Self {
        self.compensable = false;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Name of the compensation action, preferring the step's own
    pub fn compensation_action_name(&self) -> Option<&str> {
        self.compensation_action
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .or_else(|| {
                self.compensation_policy
                    .as_ref()
                    .map(|policy| policy.action_name.as_str())
                    .filter(|name| !name.trim().is_empty())
            })
    }

    /// Completed, compensable and carrying a compensation action
    pub fn is_compensation_eligible(&self) -> bool {
        self.status == StepStatus::Completed
            && self.compensable
            && self.compensation_action_name().is_some()
    }

    /// Strategy governing this step's compensation; steps without a policy are immediate
    pub fn compensation_strategy(&self) -> CompensationStrategy {
        self.compensation_policy
            .as_ref()
            .map(|policy| policy.strategy)
            .unwrap_or_default()
    }

    /// `(service, action)` to invoke for compensation
    pub fn compensation_target(&self) -> Option<(String, String)> {
        if let Some(policy) = &self.compensation_policy {
            if let (Some(service), Some(method)) =
                (&policy.target_service, &policy.compensation_method)
            {
                return Some((service.clone(), method.clone()));
            }
        }
        self.compensation_action
            .as_ref()
            .filter(|name| !name.trim().is_empty())
            .map(|action| (self.target_service.clone(), action.clone()))
    }

    /// Step inputs, overlaid with the forward output, overlaid with policy inputs
    pub fn compensation_parameters(&self) -> HashMap<String, Value> {
        let mut parameters = self.input_parameters.clone();
        if let Some(output) = &self.output_result {
            parameters.extend(output.clone());
        }
        if let Some(policy) = &self.compensation_policy {
            parameters.extend(policy.input_parameters.clone());
        }
        parameters
    }

    pub fn compensation_timeout(&self) -> Duration {
        self.compensation_policy
            .as_ref()
            .and_then(|policy| policy.timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.timeout())
    }

    /// Retry budget left for the forward action
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Retry budget left for the compensation action
    pub fn can_retry_compensation(&self) -> bool {
        let budget = self
            .compensation_policy
            .as_ref()
            .map(|policy| policy.max_retries)
            .unwrap_or(0);
        self.compensation_attempts <= budget
    }

    pub fn execution_duration(&self) -> Option<Duration> {
        let (started, completed) = (self.started_at?, self.completed_at?);
        (completed - started).to_std().ok()
    }

    fn transition(&mut self, event: StepEvent) -> StateMachineResult<()> {
        self.status = StepStateMachine::determine_target_state(self.status, &event)?;
        Ok(())
    }

    pub fn mark_running(&mut self) -> StateMachineResult<()> {
        self.transition(StepEvent::Dispatch)?;
        self.started_at = Some(Utc::now());
        self.completed_at = None;
        self.invocation_attempts += 1;
        Ok(())
    }

    pub fn mark_completed(
        &mut self,
        result: HashMap<String, Value>,
        execution_time_ms: u64,
    ) -> StateMachineResult<()> {
        self.transition(StepEvent::Complete)?;
        self.output_result = Some(result);
        self.error_message = None;
        self.execution_time_ms = Some(execution_time_ms);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) -> StateMachineResult<()> {
        let error = error.into();
        self.transition(StepEvent::Fail(error.clone()))?;
        self.error_message = Some(error);
        self.failed_at = Some(Utc::now());
        Ok(())
    }

    /// Consume one unit of the forward retry budget
    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
    }

    pub fn mark_compensating(&mut self) -> StateMachineResult<()> {
        self.transition(StepEvent::BeginCompensation)?;
        self.compensation_attempts += 1;
        Ok(())
    }

    /// Another compensation attempt while already compensating
    pub fn record_compensation_retry(&mut self) {
        self.compensation_attempts += 1;
    }

    pub fn mark_compensated(&mut self) -> StateMachineResult<()> {
        self.transition(StepEvent::CompensationSucceeded)?;
        self.compensated_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_compensation_failed(&mut self, error: impl Into<String>) -> StateMachineResult<()> {
        let error = error.into();
        self.transition(StepEvent::CompensationFailed(error.clone()))?;
        self.error_message = Some(error);
        self.failed_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_skipped(&mut self) -> StateMachineResult<()> {
        self.transition(StepEvent::Skip)
    }

    pub fn flag_manual_compensation(&mut self) {
        self.manual_compensation_required = true;
    }
}
