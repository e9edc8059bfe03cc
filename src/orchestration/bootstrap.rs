//! # Saga System Bootstrap
//!
//! Wires the engine together and hands back a handle for lifecycle management:
//!
//! ```text
//! SagaCoordinator ──StepInvocation──▶ ExecutionEngine ──DispatchMessage──▶ DispatchService
//!        ▲                                   │                                   │
//!        │                              (scheduler)                         Invoker.invoke
//!        │                                   ▼                                   │
//! CompletionProcessor ◀─────────────── EngineEvent ◀─────────────────────────────┘
//! ```
//!
//! The coordinator never holds a reference to the workers; completions reach
//! it only through the completion processor.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::completion_processor::CompletionProcessor;
use super::dispatch_service::DispatchService;
use super::execution_engine::ExecutionEngine;
use super::in_flight::InFlightRegistry;
use super::saga_coordinator::SagaCoordinator;
use crate::config::{ConfigManager, SagaConfig};
use crate::error::{SagaError, SagaResult};
use crate::events::EventPublisher;
use crate::invocation::Invoker;
use crate::store::{InMemorySagaStore, SagaStore};

/// Handle to a running saga engine
pub struct SagaSystem {
    coordinator: Arc<SagaCoordinator>,
    engine: Arc<ExecutionEngine>,
    events: EventPublisher,
    config: SagaConfig,
    shutdown_sender: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for SagaSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaSystem")
            .field("coordinator", &self.coordinator)
            .field("running", &self.is_running())
            .finish()
    }
}

impl SagaSystem {
    /// Validate `config`, build every component and spawn the background loops
    ///
    /// Must be called from within a tokio runtime.
    pub async fn bootstrap(
        config: SagaConfig,
        invoker: Arc<dyn Invoker>,
        store: Arc<dyn SagaStore>,
    ) -> SagaResult<Self> {
        info!("🚀 BOOTSTRAP: Starting saga system");
        config.validate()?;

        let execution = &config.execution;
        let (dispatch_sender, dispatch_receiver) = mpsc::channel(execution.dispatch_buffer_size);
        let (event_sender, event_receiver) = mpsc::channel(execution.event_buffer_size);
        let (shutdown_sender, shutdown_receiver) = watch::channel(false);

        let in_flight = Arc::new(InFlightRegistry::new());
        let engine = Arc::new(ExecutionEngine::new(
            in_flight.clone(),
            dispatch_sender,
            event_sender.clone(),
            config.backoff.clone(),
            execution.timeout_check_grace(),
        ));
        let events = EventPublisher::from_config(&config.events);
        let coordinator = Arc::new(SagaCoordinator::new(
            store,
            engine.clone(),
            invoker.clone(),
            events.clone(),
            config.saga.clone(),
        ));

        let dispatch_service = DispatchService::new(
            dispatch_receiver,
            event_sender,
            invoker,
            in_flight,
            execution.worker_pool_size,
            shutdown_receiver.clone(),
            execution.shutdown_timeout(),
        );
        let completion_processor =
            CompletionProcessor::new(event_receiver, coordinator.clone(), shutdown_receiver);

        let tasks = vec![
            tokio::spawn(dispatch_service.run()),
            tokio::spawn(completion_processor.run()),
        ];

        info!(
            worker_pool_size = execution.worker_pool_size,
            events_enabled = config.events.enabled,
            "✅ BOOTSTRAP: Saga system started"
        );
        Ok(Self {
            coordinator,
            engine,
            events,
            config,
            shutdown_sender,
            tasks,
        })
    }

    /// Bootstrap against the default in-memory store
    pub async fn bootstrap_in_memory(
        config: SagaConfig,
        invoker: Arc<dyn Invoker>,
    ) -> SagaResult<Self> {
        Self::bootstrap(config, invoker, Arc::new(InMemorySagaStore::new())).await
    }

    /// Load layered configuration from `config_manager`, then bootstrap
    pub async fn bootstrap_from_config(
        config_manager: &ConfigManager,
        invoker: Arc<dyn Invoker>,
        store: Arc<dyn SagaStore>,
    ) -> SagaResult<Self> {
        info!(
            environment = %config_manager.environment(),
            "BOOTSTRAP: Using loaded configuration"
        );
        Self::bootstrap(config_manager.config().clone(), invoker, store).await
    }

    pub fn coordinator(&self) -> &Arc<SagaCoordinator> {
        &self.coordinator
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        !*self.shutdown_sender.borrow()
    }

    /// Stop accepting work, interrupt in-flight executions and stop the loops
    ///
    /// Each stage is bounded by the configured shutdown timeout.
    pub async fn shutdown(self) -> SagaResult<()> {
        let timeout = self.config.execution.shutdown_timeout();
        info!(timeout_ms = timeout.as_millis() as u64, "🛑 Saga system shutdown requested");

        self.engine.shutdown(timeout).await;
        if self.shutdown_sender.send(true).is_err() {
            warn!("Background loops already stopped");
        }

        // The dispatch service spends up to `timeout` draining its own workers
        let join_timeout = timeout * 2;
        let mut stalled = 0;
        for task in self.tasks {
            if !join_with_timeout(task, join_timeout).await {
                stalled += 1;
            }
        }

        if stalled > 0 {
            error!(stalled = stalled, "Saga system loops did not stop in time");
            return Err(SagaError::Internal(format!(
                "{stalled} background task(s) did not stop within {}ms",
                timeout.as_millis()
            )));
        }
        info!("✅ Saga system stopped");
        Ok(())
    }
}

async fn join_with_timeout(mut task: JoinHandle<()>, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!(error = %e, "Background task ended abnormally");
            true
        }
        Err(_) => {
            task.abort();
            false
        }
    }
}
