//! # Dispatch Service
//!
//! The worker pool. Receives [`DispatchMessage`]s and runs each invocation on
//! its own task, bounded by a semaphore sized `worker_pool_size`.
//!
//! ```text
//! dispatch_receiver → [Semaphore] → invoker.invoke() ──┐
//!                                                      ├─→ in-flight remove → event_sender
//!                         cancel (record dropped) ─────┘   (first remover only)
//! ```
//!
//! Errors and panics inside an invocation become failure results; nothing an
//! invoked action does can take a worker down.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::in_flight::InFlightRegistry;
use super::messages::{DispatchMessage, EngineEvent};
use crate::error::InvocationError;
use crate::invocation::Invoker;
use crate::models::ServiceInvocationResult;

pub struct DispatchService {
    dispatch_receiver: mpsc::Receiver<DispatchMessage>,
    event_sender: mpsc::Sender<EngineEvent>,
    invoker: Arc<dyn Invoker>,
    in_flight: Arc<InFlightRegistry>,
    concurrency_semaphore: Arc<Semaphore>,
    shutdown: watch::Receiver<bool>,
    shutdown_timeout: Duration,
}

impl std::fmt::Debug for DispatchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchService")
            .field(
                "available_permits",
                &self.concurrency_semaphore.available_permits(),
            )
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

impl DispatchService {
    pub fn new(
        dispatch_receiver: mpsc::Receiver<DispatchMessage>,
        event_sender: mpsc::Sender<EngineEvent>,
        invoker: Arc<dyn Invoker>,
        in_flight: Arc<InFlightRegistry>,
        worker_pool_size: usize,
        shutdown: watch::Receiver<bool>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            dispatch_receiver,
            event_sender,
            invoker,
            in_flight,
            concurrency_semaphore: Arc::new(Semaphore::new(worker_pool_size.max(1))),
            shutdown,
            shutdown_timeout,
        }
    }

    /// Run until the dispatch channel closes or shutdown is signalled
    pub async fn run(mut self) {
        info!(
            worker_pool_size = self.concurrency_semaphore.available_permits(),
            "Dispatch service starting"
        );

        let mut workers = JoinSet::new();
        loop {
            tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                message = self.dispatch_receiver.recv() => {
                    let Some(message) = message else { break };
                    debug!(
                        saga_id = %message.invocation.saga_id,
                        step_name = %message.invocation.step_name,
                        execution_id = %message.execution_id,
                        kind = %message.kind,
                        "Received dispatch message"
                    );

                    workers.spawn(Self::execute(
                        message,
                        self.invoker.clone(),
                        self.in_flight.clone(),
                        self.event_sender.clone(),
                        self.concurrency_semaphore.clone(),
                    ));
                }
            }
            while workers.try_join_next().is_some() {}
        }

        self.dispatch_receiver.close();
        let outstanding = workers.len();
        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                outstanding = workers.len(),
                "Workers did not finish within the shutdown timeout, aborting"
            );
            workers.abort_all();
        }

        info!(outstanding = outstanding, "Dispatch service stopped");
    }

    async fn execute(
        message: DispatchMessage,
        invoker: Arc<dyn Invoker>,
        in_flight: Arc<InFlightRegistry>,
        event_sender: mpsc::Sender<EngineEvent>,
        semaphore: Arc<Semaphore>,
    ) {
        let DispatchMessage {
            execution_id,
            kind,
            invocation,
            mut cancelled,
        } = message;
        let key = invocation.key();

        let _permit = tokio::select! {
            permit = semaphore.acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    error!(key = %key, "Semaphore closed, reporting failure");
                    if in_flight.complete(&key, execution_id).is_some() {
                        let result = ServiceInvocationResult::failure(
                            "worker pool closed before the invocation could run",
                            0,
                        );
                        let _ = event_sender.send(EngineEvent::finished(kind, key, result)).await;
                    }
                    return;
                }
            },
            _ = &mut cancelled => {
                debug!(key = %key, execution_id = %execution_id, "Cancelled before start");
                return;
            }
        };

        let started = Instant::now();
        let call = invoker.invoke(
            &invocation.service,
            &invocation.action,
            invocation.parameters.clone(),
        );
        let outcome = tokio::select! {
            outcome = AssertUnwindSafe(call).catch_unwind() => outcome,
            _ = &mut cancelled => {
                debug!(key = %key, execution_id = %execution_id, "Invocation cancelled");
                return;
            }
        };

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                let panic_msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                error!(
                    key = %key,
                    service = %invocation.service,
                    action = %invocation.action,
                    panic_msg = %panic_msg,
                    "Invocation panicked"
                );
                ServiceInvocationResult::from_invocation_error(
                    &InvocationError::HandlerFailed {
                        message: format!("invocation panicked: {panic_msg}"),
                    },
                    started.elapsed().as_millis() as u64,
                )
            }
        };

        // A timeout check or cancellation that got here first owns the outcome
        if in_flight.complete(&key, execution_id).is_none() {
            debug!(key = %key, execution_id = %execution_id, "Late completion discarded");
            return;
        }

        debug!(
            key = %key,
            kind = %kind,
            success = result.success,
            execution_time_ms = result.execution_time_ms,
            "Invocation finished"
        );
        if let Err(e) = event_sender
            .send(EngineEvent::finished(kind, key.clone(), result))
            .await
        {
            error!(key = %key, error = %e, "Failed to report completion, coordinator loop is gone");
        }
    }
}
