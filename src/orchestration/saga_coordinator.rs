//! # Saga Coordinator
//!
//! Owns the transaction store and drives both state machines. Every public
//! operation loads a transaction, applies one transition under that saga's
//! lock, dispatches whatever work follows and writes the transaction back. No
//! operation waits on an invocation: outcomes re-enter through
//! [`SagaCoordinator::handle_step_completion`] and friends, called by the
//! completion processor.
//!
//! ## Transitions
//!
//! ```text
//! Created ──start──▶ Running ──last step ok──▶ Completed
//!                      │  ▲
//!          step failed │  │ retry due (budget left)
//!                      ▼  │
//!                   retry scheduled
//!                      │
//!      budget spent    ▼
//!                  Compensating ──sweep done──▶ Compensated
//!                      │
//!                      └──dispatch impossible──▶ Failed
//! Running ──saga timeout sweep──▶ Failed
//! ```

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::execution_engine::ExecutionEngine;
use super::messages::StepInvocation;
use crate::compensation::{CompensationStrategy, ManualCompensation};
use crate::config::SagaDefaultsConfig;
use crate::constants::{events, reasons};
use crate::error::{state_conflict, validation_error, SagaError, SagaResult};
use crate::events::EventPublisher;
use crate::invocation::Invoker;
use crate::logging::{log_saga_operation, log_step_operation};
use crate::models::{SagaStep, SagaTransaction, ServiceInvocationResult};
use crate::state_machine::{SagaStatus, StepStatus};
use crate::store::SagaStore;

pub struct SagaCoordinator {
    store: Arc<dyn SagaStore>,
    engine: Arc<ExecutionEngine>,
    invoker: Arc<dyn Invoker>,
    events: EventPublisher,
    defaults: SagaDefaultsConfig,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    manual_queue: parking_lot::Mutex<Vec<ManualCompensation>>,
}

impl std::fmt::Debug for SagaCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaCoordinator")
            .field("engine", &self.engine)
            .field("defaults", &self.defaults)
            .field("locked_sagas", &self.locks.len())
            .field("manual_queue", &self.manual_queue.lock().len())
            .finish()
    }
}

impl SagaCoordinator {
    pub fn new(
        store: Arc<dyn SagaStore>,
        engine: Arc<ExecutionEngine>,
        invoker: Arc<dyn Invoker>,
        events: EventPublisher,
        defaults: SagaDefaultsConfig,
    ) -> Self {
        Self {
            store,
            engine,
            invoker,
            events,
            defaults,
            locks: DashMap::new(),
            manual_queue: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    pub fn store(&self) -> &Arc<dyn SagaStore> {
        &self.store
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn defaults(&self) -> &SagaDefaultsConfig {
        &self.defaults
    }

    /// A step carrying the configured timeout and retry budget
    pub fn step(
        &self,
        name: impl Into<String>,
        target_service: impl Into<String>,
        action: impl Into<String>,
    ) -> SagaStep {
        SagaStep::new(name, target_service, action).with_defaults(&self.defaults)
    }

    fn saga_lock(&self, saga_id: Uuid) -> Arc<Mutex<()>> {
        self.locks.entry(saga_id).or_default().clone()
    }

    /// Load a transaction; an unknown id leaves no lock entry behind
    async fn load(&self, saga_id: Uuid) -> SagaResult<SagaTransaction> {
        match self.store.get(saga_id).await? {
            Some(saga) => Ok(saga),
            None => {
                self.locks.remove(&saga_id);
                Err(SagaError::NotFound(saga_id))
            }
        }
    }

    /// Sagas currently holding an entry in the transition lock map
    pub fn tracked_lock_count(&self) -> usize {
        self.locks.len()
    }

    // =========================================================================
    // Inbound operations
    // =========================================================================

    /// Build and register a transaction in `Created` using the configured saga timeout
    pub async fn create_saga(
        &self,
        saga_type: &str,
        correlation_id: &str,
        initiator_id: &str,
        business_context: HashMap<String, Value>,
        steps: Vec<SagaStep>,
    ) -> SagaResult<SagaTransaction> {
        let saga = SagaTransaction::new(
            saga_type,
            correlation_id,
            initiator_id,
            business_context,
            steps,
            self.defaults.default_timeout_ms,
        );
        self.register_saga(saga).await
    }

    /// Register a transaction assembled by the caller
    ///
    /// Every forward action, and every compensation the engine would invoke on
    /// its own, must resolve through the invoker before anything is stored.
    pub async fn register_saga(&self, saga: SagaTransaction) -> SagaResult<SagaTransaction> {
        if saga.status != SagaStatus::Created {
            return Err(validation_error(format!(
                "saga {} must be registered in created, not {}",
                saga.id, saga.status
            )));
        }
        saga.validate()?;
        self.validate_routes(&saga)?;

        if self.store.get(saga.id).await?.is_some() {
            return Err(state_conflict(format!("saga {} is already registered", saga.id)));
        }
        self.store.put(saga.clone()).await?;

        log_saga_operation(
            "create",
            saga.id,
            &saga.saga_type,
            &saga.correlation_id,
            "created",
            None,
        );
        self.publish(
            events::SAGA_CREATED,
            &saga,
            json!({
                "saga_type": saga.saga_type,
                "initiator_id": saga.initiator_id,
                "step_count": saga.steps.len(),
            }),
        )
        .await;
        Ok(saga)
    }

    fn validate_routes(&self, saga: &SagaTransaction) -> SagaResult<()> {
        for step in &saga.steps {
            if !self
                .invoker
                .can_resolve_action(&step.target_service, &step.action)
            {
                return Err(validation_error(format!(
                    "step '{}' targets unknown action {}.{}",
                    step.name, step.target_service, step.action
                )));
            }

            let automatic = !matches!(
                step.compensation_strategy(),
                CompensationStrategy::Manual | CompensationStrategy::Ignore
            );
            if step.compensable && automatic {
                if let Some((service, action)) = step.compensation_target() {
                    if !self.invoker.can_resolve_action(&service, &action) {
                        return Err(validation_error(format!(
                            "step '{}' compensates through unknown action {service}.{action}",
                            step.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Move a `Created` transaction to `Running` and dispatch its first step
    pub async fn start_saga(&self, saga_id: Uuid) -> SagaResult<()> {
        let lock = self.saga_lock(saga_id);
        let _guard = lock.lock().await;

        let mut saga = self.load(saga_id).await?;
        if saga.status != SagaStatus::Created {
            return Err(state_conflict(format!(
                "saga {saga_id} cannot start from {}",
                saga.status
            )));
        }

        saga.start()?;
        log_saga_operation(
            "start",
            saga.id,
            &saga.saga_type,
            &saga.correlation_id,
            "running",
            None,
        );
        self.publish(
            events::SAGA_STARTED,
            &saga,
            json!({ "first_step": saga.current_step().map(|step| step.name.clone()) }),
        )
        .await;

        let outcome = self.dispatch_current_step(&mut saga).await;
        self.store.put(saga).await?;
        outcome
    }

    /// Apply the outcome of the current step's forward invocation
    ///
    /// Rejects with `StateConflict` unless the saga is running and `step_name`
    /// names its current, running step; a duplicate or stale report never
    /// advances a transaction twice.
    pub async fn handle_step_completion(
        &self,
        saga_id: Uuid,
        step_name: &str,
        result: ServiceInvocationResult,
    ) -> SagaResult<()> {
        let lock = self.saga_lock(saga_id);
        let _guard = lock.lock().await;

        let mut saga = self.load(saga_id).await?;
        if saga.status != SagaStatus::Running {
            return Err(state_conflict(format!(
                "saga {saga_id} is {}; completion for step '{step_name}' ignored",
                saga.status
            )));
        }
        match saga.current_step() {
            Some(step) if step.name == step_name && step.status == StepStatus::Running => {}
            Some(step) => {
                return Err(state_conflict(format!(
                    "step '{step_name}' is not the running step of saga {saga_id} (current '{}' is {})",
                    step.name, step.status
                )));
            }
            None => {
                return Err(state_conflict(format!(
                    "saga {saga_id} has no current step"
                )));
            }
        }

        // An external report can arrive while the engine still runs the step
        self.engine.cancel_step_execution(saga_id, step_name);

        let outcome = if result.success {
            self.on_step_succeeded(&mut saga, result).await
        } else {
            self.on_step_failed(&mut saga, result).await
        };
        self.store.put(saga).await?;
        outcome
    }

    /// Flag-style completion report, for callers that do not build a result
    pub async fn report_step_outcome(
        &self,
        saga_id: Uuid,
        step_name: &str,
        success: bool,
        result: HashMap<String, Value>,
        error_message: Option<String>,
    ) -> SagaResult<()> {
        let outcome = if success {
            ServiceInvocationResult::success(result, 0)
        } else {
            let mut failure = ServiceInvocationResult::failure(
                error_message.unwrap_or_else(|| "step reported failure".to_string()),
                0,
            );
            failure.result = result;
            failure
        };
        self.handle_step_completion(saga_id, step_name, outcome).await
    }

    /// Re-dispatch a failed step once its backoff elapsed
    pub async fn handle_retry_due(&self, saga_id: Uuid, step_name: &str) -> SagaResult<()> {
        let lock = self.saga_lock(saga_id);
        let _guard = lock.lock().await;

        let mut saga = self.load(saga_id).await?;
        if saga.status != SagaStatus::Running {
            return Err(state_conflict(format!(
                "saga {saga_id} is {}; retry of step '{step_name}' dropped",
                saga.status
            )));
        }
        match saga.current_step() {
            Some(step) if step.name == step_name && step.status == StepStatus::Failed => {}
            _ => {
                return Err(state_conflict(format!(
                    "step '{step_name}' of saga {saga_id} is not awaiting a retry"
                )));
            }
        }

        let outcome = self.dispatch_current_step(&mut saga).await;
        self.store.put(saga).await?;
        outcome
    }

    /// Apply the outcome of a compensating invocation and continue the sweep
    pub async fn handle_compensation_completion(
        &self,
        saga_id: Uuid,
        step_name: &str,
        result: ServiceInvocationResult,
    ) -> SagaResult<()> {
        let lock = self.saga_lock(saga_id);
        let _guard = lock.lock().await;

        let mut saga = self.load(saga_id).await?;
        if saga.status != SagaStatus::Compensating {
            return Err(state_conflict(format!(
                "saga {saga_id} is {}; compensation result for '{step_name}' ignored",
                saga.status
            )));
        }
        let index = self.compensating_index(&saga, step_name)?;
        self.engine.cancel_step_execution(saga_id, step_name);

        let outcome = self.on_compensation_finished(&mut saga, index, result).await;
        self.store.put(saga).await?;
        outcome
    }

    /// Dispatch a delayed compensation, or retry a failed one, once it is due
    pub async fn handle_compensation_due(&self, saga_id: Uuid, step_name: &str) -> SagaResult<()> {
        let lock = self.saga_lock(saga_id);
        let _guard = lock.lock().await;

        let mut saga = self.load(saga_id).await?;
        if saga.status != SagaStatus::Compensating {
            return Err(state_conflict(format!(
                "saga {saga_id} is {}; due compensation of '{step_name}' dropped",
                saga.status
            )));
        }
        let index = match saga.step_index(step_name) {
            Some(index) if saga.compensation_cursor == Some(index) => index,
            _ => {
                return Err(state_conflict(format!(
                    "step '{step_name}' is not where the compensation sweep of saga {saga_id} stands"
                )));
            }
        };
        if !matches!(
            saga.steps[index].status,
            StepStatus::Completed | StepStatus::Compensating
        ) {
            return Err(state_conflict(format!(
                "step '{step_name}' of saga {saga_id} is {} and cannot be compensated",
                saga.steps[index].status
            )));
        }

        let outcome = match self.dispatch_compensation(&mut saga, index).await {
            Ok(true) => Ok(()),
            Ok(false) => self.continue_compensation(&mut saga).await,
            Err(e) => Err(e),
        };
        self.store.put(saga).await?;
        outcome
    }

    /// Fail every running transaction past its timeout; nothing is compensated
    pub async fn handle_timeout_sagas(&self) -> SagaResult<usize> {
        let now = Utc::now();
        let candidates = self.store.list_by_status(&[SagaStatus::Running]).await?;

        let mut timed_out = 0;
        for candidate in candidates.into_iter().filter(|saga| saga.is_timed_out(now)) {
            let lock = self.saga_lock(candidate.id);
            let _guard = lock.lock().await;

            let Some(mut saga) = self.store.get(candidate.id).await? else {
                self.locks.remove(&candidate.id);
                continue;
            };
            if !saga.is_timed_out(now) {
                continue;
            }

            let cancelled = self.engine.cancel_saga_executions(saga.id);
            if let Some(step) = saga.current_step_mut() {
                if step.status == StepStatus::Running {
                    step.mark_failed(reasons::SAGA_TIMEOUT)?;
                }
            }
            saga.fail(reasons::SAGA_TIMEOUT)?;
            self.store.put(saga.clone()).await?;

            warn!(
                saga_id = %saga.id,
                saga_type = %saga.saga_type,
                timeout_ms = saga.timeout_ms,
                cancelled_executions = cancelled,
                "Saga timed out"
            );
            log_saga_operation(
                "timeout",
                saga.id,
                &saga.saga_type,
                &saga.correlation_id,
                "failed",
                Some(reasons::SAGA_TIMEOUT),
            );
            self.publish(
                events::SAGA_FAILED,
                &saga,
                json!({ "reason": reasons::SAGA_TIMEOUT }),
            )
            .await;
            timed_out += 1;
        }

        if timed_out > 0 {
            info!(timed_out = timed_out, "Saga timeout sweep finished");
        }
        Ok(timed_out)
    }

    /// Remove every terminal transaction from the store
    ///
    /// Manual compensation entries outlive their transaction until acknowledged.
    pub async fn cleanup_completed_sagas(&self) -> SagaResult<usize> {
        let terminal = self
            .store
            .list_by_status(SagaStatus::terminal_states())
            .await?;

        let mut removed = 0;
        for saga in terminal {
            let lock = self.saga_lock(saga.id);
            let guard = lock.lock().await;
            if self.store.remove(saga.id).await?.is_some() {
                removed += 1;
            }
            drop(guard);
            self.locks.remove(&saga.id);
        }

        if removed > 0 {
            debug!(removed = removed, "Removed terminal sagas");
        }
        Ok(removed)
    }

    /// Transactions in `Running` or `Compensating`
    pub async fn get_active_saga_count(&self) -> SagaResult<usize> {
        Ok(self
            .store
            .list_by_status(SagaStatus::active_states())
            .await?
            .len())
    }

    pub async fn get_saga(&self, saga_id: Uuid) -> SagaResult<SagaTransaction> {
        self.load(saga_id).await
    }

    /// Pending manual compensations, lowest priority value first
    pub fn manual_compensation_queue(&self) -> Vec<ManualCompensation> {
        let mut queue = self.manual_queue.lock().clone();
        queue.sort_by_key(|entry| entry.priority);
        queue
    }

    /// Take a manual compensation off the queue once a human handled it
    pub fn acknowledge_manual_compensation(
        &self,
        saga_id: Uuid,
        step_name: &str,
    ) -> Option<ManualCompensation> {
        let mut queue = self.manual_queue.lock();
        let position = queue
            .iter()
            .position(|entry| entry.saga_id == saga_id && entry.step_name == step_name)?;
        Some(queue.remove(position))
    }

    // =========================================================================
    // Forward path
    // =========================================================================

    async fn dispatch_current_step(&self, saga: &mut SagaTransaction) -> SagaResult<()> {
        let saga_id = saga.id;
        let Some(step) = saga.current_step_mut() else {
            return Err(SagaError::Internal(format!(
                "saga {saga_id} has no step to dispatch"
            )));
        };
        step.mark_running()?;
        let invocation = StepInvocation::forward(saga_id, step);
        let step_name = step.name.clone();
        let attempt = step.invocation_attempts;

        match self.engine.execute_step_async(invocation).await {
            Ok(execution_id) => {
                debug!(
                    saga_id = %saga_id,
                    step_name = %step_name,
                    execution_id = %execution_id,
                    attempt = attempt,
                    "Step dispatched"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    saga_id = %saga_id,
                    step_name = %step_name,
                    error = %e,
                    "Step could not be dispatched"
                );
                if let Some(step) = saga.current_step_mut() {
                    step.mark_failed(e.to_string())?;
                }
                self.fail_saga(saga, format!("step '{step_name}' could not be dispatched: {e}"))
                    .await?;
                Err(e)
            }
        }
    }

    async fn on_step_succeeded(
        &self,
        saga: &mut SagaTransaction,
        result: ServiceInvocationResult,
    ) -> SagaResult<()> {
        let saga_id = saga.id;
        let step = saga
            .current_step_mut()
            .ok_or_else(|| SagaError::Internal(format!("saga {saga_id} lost its current step")))?;
        step.mark_completed(result.result, result.execution_time_ms)?;
        let step_name = step.name.clone();

        log_step_operation("complete", saga_id, &step_name, "completed", None);
        self.publish(
            events::STEP_COMPLETED,
            saga,
            json!({
                "step_name": step_name,
                "execution_time_ms": result.execution_time_ms,
            }),
        )
        .await;

        if saga.has_next_step() {
            saga.advance()?;
            return self.dispatch_current_step(saga).await;
        }

        saga.complete()?;
        log_saga_operation(
            "complete",
            saga.id,
            &saga.saga_type,
            &saga.correlation_id,
            "completed",
            None,
        );
        self.publish(
            events::SAGA_COMPLETED,
            saga,
            json!({ "total_retries": saga.total_retries }),
        )
        .await;
        Ok(())
    }

    async fn on_step_failed(
        &self,
        saga: &mut SagaTransaction,
        result: ServiceInvocationResult,
    ) -> SagaResult<()> {
        let saga_id = saga.id;
        let error_message = result.error_or_default();
        let step = saga
            .current_step_mut()
            .ok_or_else(|| SagaError::Internal(format!("saga {saga_id} lost its current step")))?;
        step.mark_failed(error_message.clone())?;
        let step_name = step.name.clone();

        if step.can_retry() {
            let attempt = step.retry_count;
            step.increment_retry();
            let (retry_count, max_retries) = (step.retry_count, step.max_retries);
            saga.record_retry();

            return match self.engine.retry_step(saga_id, &step_name, attempt) {
                Ok(delay) => {
                    info!(
                        saga_id = %saga_id,
                        step_name = %step_name,
                        retry_count = retry_count,
                        max_retries = max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error_message,
                        "Step failed, retry scheduled"
                    );
                    self.publish(
                        events::STEP_RETRY_SCHEDULED,
                        saga,
                        json!({
                            "step_name": step_name,
                            "retry_count": retry_count,
                            "delay_ms": delay.as_millis() as u64,
                            "error": error_message,
                        }),
                    )
                    .await;
                    Ok(())
                }
                Err(e) => {
                    self.fail_saga(saga, format!("retry of step '{step_name}' could not be scheduled: {e}"))
                        .await?;
                    Err(e)
                }
            };
        }

        log_step_operation("fail", saga_id, &step_name, "failed", Some(&error_message));
        self.publish(
            events::STEP_FAILED,
            saga,
            json!({
                "step_name": step_name,
                "error": error_message,
                "error_kind": result.error_kind,
                "status_code": result.status_code,
            }),
        )
        .await;

        saga.begin_compensation()?;
        log_saga_operation(
            "compensate",
            saga.id,
            &saga.saga_type,
            &saga.correlation_id,
            "compensating",
            Some(&error_message),
        );
        self.publish(
            events::SAGA_COMPENSATING,
            saga,
            json!({ "failed_step": step_name, "error": error_message }),
        )
        .await;

        self.continue_compensation(saga).await
    }

    // =========================================================================
    // Compensation sweep
    // =========================================================================

    /// Walk completed steps in reverse until one is dispatched or scheduled
    ///
    /// At most one compensation is outstanding at a time; the sweep resumes
    /// when its outcome arrives.
    async fn continue_compensation(&self, saga: &mut SagaTransaction) -> SagaResult<()> {
        let saga_id = saga.id;
        while let Some(index) = saga.next_compensation_candidate() {
            let step = &saga.steps[index];
            let step_name = step.name.clone();
            if !step.is_compensation_eligible() {
                debug!(saga_id = %saga_id, step_name = %step_name, "Step not compensable, skipping");
                continue;
            }

            let strategy = step.compensation_strategy();
            let condition_holds = step
                .compensation_policy
                .as_ref()
                .map_or(true, |policy| policy.should_compensate(&saga.business_context));
            let delay = step
                .compensation_policy
                .as_ref()
                .map_or(Duration::ZERO, |policy| policy.delay());

            match strategy {
                CompensationStrategy::Ignore => {
                    debug!(saga_id = %saga_id, step_name = %step_name, "Compensation ignored by policy");
                    continue;
                }
                CompensationStrategy::Manual => {
                    self.queue_manual_compensation(saga, index).await;
                    continue;
                }
                CompensationStrategy::Conditional if !condition_holds => {
                    debug!(saga_id = %saga_id, step_name = %step_name, "Compensation condition not met");
                    continue;
                }
                CompensationStrategy::Delayed => {
                    return match self.engine.schedule_compensation(saga_id, &step_name, delay) {
                        Ok(()) => {
                            debug!(
                                saga_id = %saga_id,
                                step_name = %step_name,
                                delay_ms = delay.as_millis() as u64,
                                "Compensation scheduled"
                            );
                            Ok(())
                        }
                        Err(e) => self.abort_compensation(saga, &step_name, e).await,
                    };
                }
                CompensationStrategy::Conditional | CompensationStrategy::Immediate => {}
            }

            if self.dispatch_compensation(saga, index).await? {
                return Ok(());
            }
        }

        self.finish_compensation(saga).await
    }

    /// Dispatch the compensation of `steps[index]`; `false` when nothing was dispatched
    async fn dispatch_compensation(
        &self,
        saga: &mut SagaTransaction,
        index: usize,
    ) -> SagaResult<bool> {
        let saga_id = saga.id;
        let step = &mut saga.steps[index];
        if step.status == StepStatus::Compensating {
            step.record_compensation_retry();
        } else {
            step.mark_compensating()?;
        }
        let step_name = step.name.clone();

        let Some(invocation) = StepInvocation::compensation(saga_id, step) else {
            step.mark_compensation_failed("no compensation target")?;
            saga.record_compensation_failure();
            warn!(saga_id = %saga_id, step_name = %step_name, "Step has no compensation target");
            self.publish(
                events::STEP_COMPENSATION_FAILED,
                saga,
                json!({ "step_name": step_name, "error": "no compensation target" }),
            )
            .await;
            return Ok(false);
        };
        let attempt = step.compensation_attempts;

        match self.engine.execute_compensation_async(invocation).await {
            Ok(execution_id) => {
                debug!(
                    saga_id = %saga_id,
                    step_name = %step_name,
                    execution_id = %execution_id,
                    attempt = attempt,
                    "Compensation dispatched"
                );
                Ok(true)
            }
            Err(e) => {
                saga.steps[index].mark_compensation_failed(e.to_string())?;
                saga.record_compensation_failure();
                self.abort_compensation(saga, &step_name, e).await?;
                Ok(false)
            }
        }
    }

    async fn on_compensation_finished(
        &self,
        saga: &mut SagaTransaction,
        index: usize,
        result: ServiceInvocationResult,
    ) -> SagaResult<()> {
        let saga_id = saga.id;
        let step = &mut saga.steps[index];
        let step_name = step.name.clone();

        if result.success {
            step.mark_compensated()?;
            log_step_operation("compensate", saga_id, &step_name, "compensated", None);
            self.publish(
                events::STEP_COMPENSATED,
                saga,
                json!({
                    "step_name": step_name,
                    "execution_time_ms": result.execution_time_ms,
                }),
            )
            .await;
            return self.continue_compensation(saga).await;
        }

        let error_message = result.error_or_default();
        if step.can_retry_compensation() {
            let interval = step
                .compensation_policy
                .as_ref()
                .map_or(Duration::ZERO, |policy| policy.retry_interval());
            let attempts = step.compensation_attempts;
            return match self.engine.schedule_compensation(saga_id, &step_name, interval) {
                Ok(()) => {
                    info!(
                        saga_id = %saga_id,
                        step_name = %step_name,
                        attempts = attempts,
                        delay_ms = interval.as_millis() as u64,
                        error = %error_message,
                        "Compensation failed, retry scheduled"
                    );
                    Ok(())
                }
                Err(e) => {
                    saga.steps[index].mark_compensation_failed(error_message)?;
                    saga.record_compensation_failure();
                    self.abort_compensation(saga, &step_name, e).await
                }
            };
        }

        step.mark_compensation_failed(error_message.clone())?;
        saga.record_compensation_failure();
        let failure = SagaError::Compensation {
            step: step_name.clone(),
            reason: error_message.clone(),
        };
        warn!(saga_id = %saga_id, error = %failure, "Compensation failed, continuing sweep");
        log_step_operation(
            "compensate",
            saga_id,
            &step_name,
            "compensation_failed",
            Some(&error_message),
        );
        self.publish(
            events::STEP_COMPENSATION_FAILED,
            saga,
            json!({ "step_name": step_name, "error": error_message }),
        )
        .await;

        self.continue_compensation(saga).await
    }

    async fn queue_manual_compensation(&self, saga: &mut SagaTransaction, index: usize) {
        let step = &mut saga.steps[index];
        step.flag_manual_compensation();
        let entry = ManualCompensation {
            saga_id: saga.id,
            saga_type: saga.saga_type.clone(),
            correlation_id: saga.correlation_id.clone(),
            step_name: step.name.clone(),
            action_name: step
                .compensation_action_name()
                .unwrap_or_default()
                .to_string(),
            priority: step
                .compensation_policy
                .as_ref()
                .map_or(step.priority, |policy| policy.effective_priority()),
        };

        warn!(
            saga_id = %entry.saga_id,
            step_name = %entry.step_name,
            action_name = %entry.action_name,
            priority = entry.priority,
            "Manual compensation required"
        );
        let payload = json!({
            "step_name": entry.step_name,
            "action_name": entry.action_name,
            "priority": entry.priority,
        });
        self.manual_queue.lock().push(entry);
        self.publish(events::STEP_MANUAL_COMPENSATION_REQUIRED, saga, payload)
            .await;
    }

    async fn finish_compensation(&self, saga: &mut SagaTransaction) -> SagaResult<()> {
        saga.finish_compensation()?;
        let details = saga
            .has_compensation_failures()
            .then(|| format!("{} compensation(s) failed", saga.compensation_failures));
        log_saga_operation(
            "compensate",
            saga.id,
            &saga.saga_type,
            &saga.correlation_id,
            "compensated",
            details.as_deref(),
        );
        self.publish(
            events::SAGA_COMPENSATED,
            saga,
            json!({ "compensation_failures": saga.compensation_failures }),
        )
        .await;
        Ok(())
    }

    /// The sweep cannot continue: the transaction ends `Failed`
    async fn abort_compensation(
        &self,
        saga: &mut SagaTransaction,
        step_name: &str,
        cause: SagaError,
    ) -> SagaResult<()> {
        self.fail_saga(
            saga,
            format!("compensation of step '{step_name}' could not proceed: {cause}"),
        )
        .await?;
        Err(cause)
    }

    async fn fail_saga(&self, saga: &mut SagaTransaction, reason: String) -> SagaResult<()> {
        saga.fail(reason.clone())?;
        error!(saga_id = %saga.id, reason = %reason, "Saga failed");
        log_saga_operation(
            "fail",
            saga.id,
            &saga.saga_type,
            &saga.correlation_id,
            "failed",
            Some(&reason),
        );
        self.publish(events::SAGA_FAILED, saga, json!({ "reason": reason }))
            .await;
        Ok(())
    }

    fn compensating_index(&self, saga: &SagaTransaction, step_name: &str) -> SagaResult<usize> {
        match saga.step_index(step_name) {
            Some(index) if saga.steps[index].status == StepStatus::Compensating => Ok(index),
            Some(index) => Err(state_conflict(format!(
                "step '{step_name}' of saga {} is {}, not compensating",
                saga.id, saga.steps[index].status
            ))),
            None => Err(state_conflict(format!(
                "saga {} has no step '{step_name}'",
                saga.id
            ))),
        }
    }

    async fn publish(&self, name: &str, saga: &SagaTransaction, payload: Value) {
        if let Err(e) = self
            .events
            .publish_named(name, saga.id, &saga.correlation_id, payload)
            .await
        {
            warn!(event = name, saga_id = %saga.id, error = %e, "Failed to publish lifecycle event");
        }
    }
}
