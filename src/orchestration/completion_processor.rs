//! # Completion Processor
//!
//! The single loop that feeds [`EngineEvent`]s back into the coordinator.
//! Workers, timeout checks and the delay scheduler only ever post events; this
//! is the one place those events turn into transitions.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::messages::EngineEvent;
use super::saga_coordinator::SagaCoordinator;
use crate::error::{SagaError, SagaResult};

pub struct CompletionProcessor {
    receiver: mpsc::Receiver<EngineEvent>,
    coordinator: Arc<SagaCoordinator>,
    shutdown: watch::Receiver<bool>,
}

impl CompletionProcessor {
    pub fn new(
        receiver: mpsc::Receiver<EngineEvent>,
        coordinator: Arc<SagaCoordinator>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            receiver,
            coordinator,
            shutdown,
        }
    }

    /// Process events until the channel closes or shutdown is signalled
    pub async fn run(mut self) {
        info!("Completion processor starting");
        let mut processed: u64 = 0;

        loop {
            tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                event = self.receiver.recv() => {
                    let Some(event) = event else { break };
                    Self::process(&self.coordinator, event).await;
                    processed += 1;
                }
            }
        }

        self.receiver.close();
        info!(processed = processed, "Completion processor stopped");
    }

    async fn process(coordinator: &SagaCoordinator, event: EngineEvent) {
        let saga_id = event.saga_id();
        let step_name = event.step_name().to_string();
        let event_type = event.event_type();
        debug!(saga_id = %saga_id, step_name = %step_name, event_type = event_type, "Processing engine event");

        let outcome: SagaResult<()> = match event {
            EngineEvent::StepFinished {
                saga_id,
                step_name,
                result,
            } => {
                coordinator
                    .handle_step_completion(saga_id, &step_name, result)
                    .await
            }
            EngineEvent::CompensationFinished {
                saga_id,
                step_name,
                result,
            } => {
                coordinator
                    .handle_compensation_completion(saga_id, &step_name, result)
                    .await
            }
            EngineEvent::RetryDue { saga_id, step_name } => {
                coordinator.handle_retry_due(saga_id, &step_name).await
            }
            EngineEvent::CompensationDue { saga_id, step_name } => {
                coordinator.handle_compensation_due(saga_id, &step_name).await
            }
        };

        match outcome {
            Ok(()) => {}
            // Stale events for sagas that moved on or were cleaned up
            Err(e @ (SagaError::StateConflict(_) | SagaError::NotFound(_))) => {
                debug!(saga_id = %saga_id, step_name = %step_name, event_type = event_type, error = %e, "Engine event discarded");
            }
            Err(SagaError::Shutdown) => {
                warn!(saga_id = %saga_id, step_name = %step_name, event_type = event_type, "Engine event arrived during shutdown");
            }
            Err(e) => {
                error!(saga_id = %saga_id, step_name = %step_name, event_type = event_type, error = %e, "Failed to apply engine event");
            }
        }
    }
}
