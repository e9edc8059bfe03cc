//! # Execution Engine
//!
//! Asynchronous dispatch of forward and compensating invocations. The engine
//! owns the in-flight map and the delay scheduler; it never calls back into
//! the coordinator directly. Outcomes, due retries and due compensations are
//! posted as [`EngineEvent`]s to the coordinator loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::in_flight::{InFlightRegistry, InFlightSnapshot};
use super::messages::{DispatchMessage, EngineEvent, ExecutionKey, ExecutionKind, StepInvocation};
use super::scheduler::Scheduler;
use crate::config::BackoffConfig;
use crate::constants::reasons;
use crate::error::{state_conflict, InvocationError, SagaError, SagaResult};
use crate::models::ServiceInvocationResult;

pub struct ExecutionEngine {
    in_flight: Arc<InFlightRegistry>,
    dispatch_sender: mpsc::Sender<DispatchMessage>,
    event_sender: mpsc::Sender<EngineEvent>,
    scheduler: Scheduler,
    backoff: BackoffConfig,
    timeout_grace: Duration,
    shutting_down: AtomicBool,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("in_flight", &self.in_flight.len())
            .field("scheduled", &self.scheduler.pending())
            .field("backoff", &self.backoff)
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

impl ExecutionEngine {
    pub fn new(
        in_flight: Arc<InFlightRegistry>,
        dispatch_sender: mpsc::Sender<DispatchMessage>,
        event_sender: mpsc::Sender<EngineEvent>,
        backoff: BackoffConfig,
        timeout_grace: Duration,
    ) -> Self {
        Self {
            in_flight,
            dispatch_sender,
            event_sender,
            scheduler: Scheduler::new(),
            backoff,
            timeout_grace,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Dispatch a step's forward action
    pub async fn execute_step_async(&self, invocation: StepInvocation) -> SagaResult<Uuid> {
        self.dispatch(ExecutionKind::Forward, invocation).await
    }

    /// Dispatch a step's compensating action; the forward retry budget is untouched
    pub async fn execute_compensation_async(&self, invocation: StepInvocation) -> SagaResult<Uuid> {
        self.dispatch(ExecutionKind::Compensation, invocation).await
    }

    async fn dispatch(&self, kind: ExecutionKind, invocation: StepInvocation) -> SagaResult<Uuid> {
        if self.is_shutting_down() {
            return Err(SagaError::Shutdown);
        }

        let key = invocation.key();
        let timeout = invocation.timeout;
        let Some((execution_id, cancelled)) = self.in_flight.register(key.clone(), kind, timeout)
        else {
            warn!(key = %key, kind = %kind, "Refusing duplicate dispatch");
            return Err(state_conflict(format!(
                "an execution for step '{}' of saga {} is already in flight",
                key.step_name, key.saga_id
            )));
        };

        let message = DispatchMessage {
            execution_id,
            kind,
            invocation,
            cancelled,
        };
        if self.dispatch_sender.send(message).await.is_err() {
            self.in_flight.complete(&key, execution_id);
            return Err(SagaError::Shutdown);
        }

        if let Err(e) = self.schedule_timeout_check(key.clone(), execution_id, kind, timeout) {
            self.in_flight.cancel(&key);
            return Err(e);
        }

        debug!(
            key = %key,
            kind = %kind,
            execution_id = %execution_id,
            timeout_ms = timeout.as_millis() as u64,
            "Dispatched execution"
        );
        Ok(execution_id)
    }

    fn schedule_timeout_check(
        &self,
        key: ExecutionKey,
        execution_id: Uuid,
        kind: ExecutionKind,
        timeout: Duration,
    ) -> SagaResult<()> {
        let in_flight = self.in_flight.clone();
        let event_sender = self.event_sender.clone();
        self.scheduler
            .schedule(timeout + self.timeout_grace, async move {
                if let Some(record) = in_flight.expire(&key, execution_id) {
                    let elapsed = record.elapsed();
                    record.cancel();
                    warn!(
                        key = %key,
                        kind = %kind,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Execution timed out"
                    );
                    let _ = event_sender
                        .send(EngineEvent::finished(kind, key, timeout_result(elapsed)))
                        .await;
                }
            })
    }

    /// Re-dispatch after `min(base * 2^retry_count, max)`, via a `RetryDue` event
    pub fn retry_step(
        &self,
        saga_id: Uuid,
        step_name: &str,
        retry_count: u32,
    ) -> SagaResult<Duration> {
        if self.is_shutting_down() {
            return Err(SagaError::Shutdown);
        }

        let delay = self.backoff.delay_for(retry_count);
        let event = EngineEvent::RetryDue {
            saga_id,
            step_name: step_name.to_string(),
        };
        self.post_after(delay, event)?;

        debug!(
            saga_id = %saga_id,
            step_name = %step_name,
            retry_count = retry_count,
            delay_ms = delay.as_millis() as u64,
            "Scheduled step retry"
        );
        Ok(delay)
    }

    /// Dispatch a compensation later, via a `CompensationDue` event
    pub fn schedule_compensation(
        &self,
        saga_id: Uuid,
        step_name: &str,
        delay: Duration,
    ) -> SagaResult<()> {
        if self.is_shutting_down() {
            return Err(SagaError::Shutdown);
        }
        let event = EngineEvent::CompensationDue {
            saga_id,
            step_name: step_name.to_string(),
        };
        self.post_after(delay, event)
    }

    fn post_after(&self, delay: Duration, event: EngineEvent) -> SagaResult<()> {
        let event_sender = self.event_sender.clone();
        self.scheduler.schedule(delay, async move {
            if event_sender.send(event).await.is_err() {
                debug!("Coordinator loop closed before a scheduled event fired");
            }
        })
    }

    /// Cancel one execution without reporting an outcome
    pub fn cancel_step_execution(&self, saga_id: Uuid, step_name: &str) -> bool {
        let cancelled = self
            .in_flight
            .cancel(&ExecutionKey::new(saga_id, step_name));
        if cancelled {
            info!(saga_id = %saga_id, step_name = %step_name, "Cancelled step execution");
        }
        cancelled
    }

    /// Cancel every execution of a saga without reporting outcomes
    pub fn cancel_saga_executions(&self, saga_id: Uuid) -> usize {
        let cancelled = self.in_flight.cancel_saga(saga_id);
        if cancelled > 0 {
            info!(saga_id = %saga_id, cancelled = cancelled, "Cancelled saga executions");
        }
        cancelled
    }

    /// Sweep executions past their budget; each is cancelled and reported as timed out
    pub async fn cleanup_timeout_steps(&self) -> usize {
        let expired = self.in_flight.drain_expired();
        let count = expired.len();

        for (key, record) in expired {
            let kind = record.kind;
            let elapsed = record.elapsed();
            record.cancel();
            warn!(key = %key, kind = %kind, "Execution timed out during sweep");
            let _ = self
                .event_sender
                .send(EngineEvent::finished(kind, key, timeout_result(elapsed)))
                .await;
        }
        count
    }

    pub fn is_in_flight(&self, saga_id: Uuid, step_name: &str) -> bool {
        self.in_flight
            .contains(&ExecutionKey::new(saga_id, step_name))
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn in_flight_snapshot(&self) -> Vec<InFlightSnapshot> {
        self.in_flight.snapshot()
    }

    pub fn scheduled_count(&self) -> usize {
        self.scheduler.pending()
    }

    pub fn backoff(&self) -> &BackoffConfig {
        &self.backoff
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Refuse new work, interrupt outstanding executions and stop the scheduler
    pub async fn shutdown(&self, timeout: Duration) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let cancelled = self.in_flight.cancel_all();
        info!(cancelled = cancelled, "Execution engine shutting down");
        self.scheduler.shutdown(timeout).await;
    }
}

fn timeout_result(elapsed: Duration) -> ServiceInvocationResult {
    let elapsed_ms = elapsed.as_millis() as u64;
    let mut result =
        ServiceInvocationResult::from_invocation_error(&InvocationError::Timeout { elapsed_ms }, elapsed_ms);
    result.error_message = Some(reasons::STEP_TIMEOUT.to_string());
    result
}
