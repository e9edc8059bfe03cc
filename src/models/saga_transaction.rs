use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use uuid::Uuid;

use super::saga_step::SagaStep;
use crate::error::{validation_error, SagaResult};
use crate::state_machine::{
    SagaEvent, SagaStateMachine, SagaStatus, StateMachineError, StateMachineResult, StepStatus,
};

/// A multi-step business transaction coordinated as a saga
///
/// Mutated only through the named transition methods below; once the status is
/// terminal every transition is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaTransaction {
    pub id: Uuid,
    pub saga_type: String,
    pub correlation_id: String,
    pub initiator_id: String,
    pub status: SagaStatus,
    pub steps: Vec<SagaStep>,
    /// Invariant: `0 <= current_step_index <= steps.len()`
    pub current_step_index: usize,
    pub business_context: HashMap<String, Value>,
    /// Forward retries consumed across all steps
    pub total_retries: u32,
    pub compensation_failures: u32,
    /// Index the reverse sweep examines next (exclusive upper bound)
    pub compensation_cursor: Option<usize>,
    pub failure_reason: Option<String>,
    pub timeout_ms: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SagaTransaction {
    /// Build a transaction in `Created` with its ordered steps attached
    pub fn new(
        saga_type: impl Into<String>,
        correlation_id: impl Into<String>,
        initiator_id: impl Into<String>,
        business_context: HashMap<String, Value>,
        mut steps: Vec<SagaStep>,
        timeout_ms: u64,
    ) -> Self {
        // Stable: steps sharing an order keep their insertion order
        steps.sort_by_key(|step| step.order);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            saga_type: saga_type.into(),
            correlation_id: correlation_id.into(),
            initiator_id: initiator_id.into(),
            status: SagaStatus::Created,
            steps,
            current_step_index: 0,
            business_context,
            total_retries: 0,
            compensation_failures: 0,
            compensation_cursor: None,
            failure_reason: None,
            timeout_ms,
            created_at: now,
            started_at: None,
            completed_at: None,
            failed_at: None,
            updated_at: now,
        }
    }

    /// Structural checks performed before the transaction is registered
    pub fn validate(&self) -> SagaResult<()> {
        if self.saga_type.trim().is_empty() {
            return Err(validation_error("saga type is required"));
        }
        if self.correlation_id.trim().is_empty() {
            return Err(validation_error("correlation id is required"));
        }
        if self.initiator_id.trim().is_empty() {
            return Err(validation_error("initiator id is required"));
        }
        if self.steps.is_empty() {
            return Err(validation_error("a saga needs at least one step"));
        }
        if self.timeout_ms == 0 {
            return Err(validation_error("saga timeout must be positive"));
        }

        let mut names = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(validation_error("step name is required"));
            }
            if !names.insert(step.name.as_str()) {
                return Err(validation_error(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }
            if step.target_service.trim().is_empty() || step.action.trim().is_empty() {
                return Err(validation_error(format!(
                    "step '{}' needs a target service and an action",
                    step.name
                )));
            }
            if step.timeout_ms == 0 {
                return Err(validation_error(format!(
                    "step '{}' timeout must be positive",
                    step.name
                )));
            }
            if let Some(policy) = &step.compensation_policy {
                if !policy.is_valid() {
                    return Err(validation_error(format!(
                        "step '{}' has an invalid compensation policy '{}'",
                        step.name, policy.action_name
                    )));
                }
            }
        }
        Ok(())
    }

    fn transition(&mut self, event: SagaEvent) -> StateMachineResult<()> {
        self.status = SagaStateMachine::determine_target_state(self.status, &event)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Reject mutation of a terminal transaction
    pub fn ensure_mutable(&self) -> StateMachineResult<()> {
        if self.status.is_terminal() {
            return Err(StateMachineError::TerminalState {
                state: self.status.to_string(),
            });
        }
        Ok(())
    }

    pub fn start(&mut self) -> StateMachineResult<()> {
        self.transition(SagaEvent::Start)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn current_step(&self) -> Option<&SagaStep> {
        self.steps.get(self.current_step_index)
    }

    pub fn current_step_mut(&mut self) -> Option<&mut SagaStep> {
        self.steps.get_mut(self.current_step_index)
    }

    pub fn step(&self, name: &str) -> Option<&SagaStep> {
        self.steps.iter().find(|step| step.name == name)
    }

    pub fn step_mut(&mut self, name: &str) -> Option<&mut SagaStep> {
        self.steps.iter_mut().find(|step| step.name == name)
    }

    pub fn step_index(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.name == name)
    }

    pub fn has_next_step(&self) -> bool {
        self.current_step_index + 1 < self.steps.len()
    }

    /// Move to the next step; only legal once the current one completed
    pub fn advance(&mut self) -> StateMachineResult<()> {
        self.ensure_mutable()?;
        match self.current_step() {
            Some(step) if step.status == StepStatus::Completed && self.has_next_step() => {
                self.current_step_index += 1;
                self.updated_at = Utc::now();
                Ok(())
            }
            Some(step) => Err(StateMachineError::InvalidTransition {
                from: step.status.to_string(),
                event: "advance".to_string(),
            }),
            None => Err(StateMachineError::InvalidTransition {
                from: self.status.to_string(),
                event: "advance".to_string(),
            }),
        }
    }

    pub fn complete(&mut self) -> StateMachineResult<()> {
        self.transition(SagaEvent::Complete)?;
        self.current_step_index = self.steps.len();
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Enter `Compensating`; the reverse sweep starts below the failed step
    pub fn begin_compensation(&mut self) -> StateMachineResult<()> {
        self.transition(SagaEvent::BeginCompensation)?;
        self.compensation_cursor = Some(self.current_step_index);
        Ok(())
    }

    /// Next completed step below the cursor, in strict reverse order
    pub fn next_compensation_candidate(&mut self) -> Option<usize> {
        let cursor = self.compensation_cursor.as_mut()?;
        while *cursor > 0 {
            *cursor -= 1;
            if self.steps[*cursor].status == StepStatus::Completed {
                return Some(*cursor);
            }
        }
        None
    }

    pub fn finish_compensation(&mut self) -> StateMachineResult<()> {
        self.transition(SagaEvent::FinishCompensation)?;
        self.compensation_cursor = None;
        self.completed_at = Some(Utc::now());
        self.skip_pending_steps();
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> StateMachineResult<()> {
        let reason = reason.into();
        self.transition(SagaEvent::Fail(reason.clone()))?;
        self.failure_reason = Some(reason);
        self.failed_at = Some(Utc::now());
        self.skip_pending_steps();
        Ok(())
    }

    /// Steps that never ran are marked `Skipped`
    pub fn skip_pending_steps(&mut self) {
        for step in &mut self.steps {
            if step.status == StepStatus::Pending {
                // Pending -> Skipped is always legal
                let _ = step.mark_skipped();
            }
        }
    }

    pub fn record_retry(&mut self) {
        self.total_retries += 1;
        self.updated_at = Utc::now();
    }

    pub fn record_compensation_failure(&mut self) {
        self.compensation_failures += 1;
        self.updated_at = Utc::now();
    }

    pub fn has_compensation_failures(&self) -> bool {
        self.compensation_failures > 0
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Time since start, if started
    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.started_at.and_then(|started| (now - started).to_std().ok())
    }

    /// Running and past its budget
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        self.status == SagaStatus::Running
            && self
                .elapsed(now)
                .is_some_and(|elapsed| elapsed > self.timeout())
    }

    pub fn running_step_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| step.status == StepStatus::Running)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn saga(steps: Vec<SagaStep>) -> SagaTransaction {
        SagaTransaction::new(
            "order_fulfillment",
            "corr-1",
            "user-1",
            HashMap::from([("status".to_string(), json!("new"))]),
            steps,
            60_000,
        )
    }

    fn three_steps() -> Vec<SagaStep> {
        vec![
            SagaStep::new("reserve", "inventory-service", "reserveItems").with_compensation("releaseItems"),
            SagaStep::new("charge", "payment-service", "chargeCard").with_compensation("refundCard"),
            SagaStep::new("ship", "shipping-service", "createShipment"),
        ]
    }

    fn complete_current(saga: &mut SagaTransaction) {
        let step = saga.current_step_mut().unwrap();
        step.mark_running().unwrap();
        step.mark_completed(HashMap::new(), 1).unwrap();
    }

    #[test]
    fn test_validation_rejects_missing_identity() {
        let mut tx = saga(three_steps());
        assert!(tx.validate().is_ok());

        tx.correlation_id = " ".to_string();
        assert!(tx.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_duplicate_step_names() {
        let tx = saga(vec![
            SagaStep::new("a", "svc", "doA"),
            SagaStep::new("a", "svc", "doB"),
        ]);
        assert!(tx.validate().is_err());
    }

    #[test]
    fn test_steps_are_sorted_by_order() {
        let tx = saga(vec![
            SagaStep::new("second", "svc", "b").with_order(2),
            SagaStep::new("first", "svc", "a").with_order(1),
        ]);
        assert_eq!(tx.steps[0].name, "first");
        assert_eq!(tx.steps[1].name, "second");
    }

    #[test]
    fn test_advance_requires_completed_current_step() {
        let mut tx = saga(three_steps());
        tx.start().unwrap();
        assert!(tx.advance().is_err());

        complete_current(&mut tx);
        tx.advance().unwrap();
        assert_eq!(tx.current_step_index, 1);
    }

    #[test]
    fn test_complete_sets_index_to_len() {
        let mut tx = saga(three_steps());
        tx.start().unwrap();
        for _ in 0..2 {
            complete_current(&mut tx);
            tx.advance().unwrap();
        }
        complete_current(&mut tx);
        assert!(!tx.has_next_step());
        tx.complete().unwrap();
        assert_eq!(tx.current_step_index, tx.steps.len());
        assert!(tx.start().is_err());
    }

    #[test]
    fn test_reverse_compensation_candidates() {
        let mut tx = saga(three_steps());
        tx.start().unwrap();
        complete_current(&mut tx);
        tx.advance().unwrap();
        complete_current(&mut tx);
        tx.advance().unwrap();
        let step = tx.current_step_mut().unwrap();
        step.mark_running().unwrap();
        step.mark_failed("carrier down").unwrap();

        tx.begin_compensation().unwrap();
        assert_eq!(tx.next_compensation_candidate(), Some(1));
        assert_eq!(tx.next_compensation_candidate(), Some(0));
        assert_eq!(tx.next_compensation_candidate(), None);

        tx.finish_compensation().unwrap();
        assert_eq!(tx.status, SagaStatus::Compensated);
    }

    #[test]
    fn test_fail_skips_pending_steps() {
        let mut tx = saga(three_steps());
        tx.start().unwrap();
        tx.current_step_mut().unwrap().mark_running().unwrap();
        tx.fail("saga timed out").unwrap();

        assert_eq!(tx.status, SagaStatus::Failed);
        assert_eq!(tx.steps[0].status, StepStatus::Running);
        assert_eq!(tx.steps[1].status, StepStatus::Skipped);
        assert_eq!(tx.steps[2].status, StepStatus::Skipped);
        assert_eq!(tx.failure_reason.as_deref(), Some("saga timed out"));
        assert!(tx.ensure_mutable().is_err());
    }

    #[test]
    fn test_timeout_detection() {
        let mut tx = saga(three_steps());
        let now = Utc::now();
        assert!(!tx.is_timed_out(now));

        tx.start().unwrap();
        tx.started_at = Some(now - chrono::Duration::milliseconds(60_001));
        assert!(tx.is_timed_out(now));

        tx.started_at = Some(now - chrono::Duration::milliseconds(59_000));
        assert!(!tx.is_timed_out(now));
    }
}
