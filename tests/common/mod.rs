//! Shared harness for saga engine integration tests
//!
//! Boots a full [`SagaSystem`] over in-process handlers that record every call,
//! with millisecond backoff so retry paths run quickly.

#![allow(dead_code)]

use parking_lot::Mutex;
use saga_core::config::SagaConfig;
use saga_core::invocation::{handler_fn, HandlerRegistry, ServiceInvoker};
use saga_core::orchestration::{SagaCoordinator, SagaSystem};
use saga_core::{SagaStatus, SagaTransaction};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const WAIT: Duration = Duration::from_secs(5);

/// Ordered record of `service.action` invocations
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn record(&self, service: &str, action: &str) {
        self.calls.lock().push(format!("{service}.{action}"));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == call).count()
    }
}

/// Small budgets so retries, timeouts and delays resolve within a test
pub fn fast_config() -> SagaConfig {
    let mut config = SagaConfig::default();
    config.execution.worker_pool_size = 4;
    config.execution.shutdown_timeout_ms = 500;
    config.backoff.base_delay_ms = 5;
    config.backoff.max_delay_ms = 20;
    config.saga.default_timeout_ms = 30_000;
    config.saga.default_step_timeout_ms = 2_000;
    config.saga.default_max_retries = 0;
    config.events.channel_capacity = 256;
    config
}

pub struct TestSaga {
    pub system: SagaSystem,
    pub handlers: Arc<HandlerRegistry>,
    pub calls: CallLog,
}

impl TestSaga {
    pub async fn start() -> Self {
        Self::with_config(fast_config()).await
    }

    pub async fn with_config(config: SagaConfig) -> Self {
        saga_core::logging::init_structured_logging();
        let handlers = Arc::new(HandlerRegistry::new());
        let invoker = Arc::new(
            ServiceInvoker::new(handlers.clone(), &config.invoker).expect("invoker should build"),
        );
        let system = SagaSystem::bootstrap_in_memory(config, invoker)
            .await
            .expect("saga system should bootstrap");
        Self {
            system,
            handlers,
            calls: CallLog::default(),
        }
    }

    pub fn coordinator(&self) -> &Arc<SagaCoordinator> {
        self.system.coordinator()
    }

    /// Handler that records the call and echoes its parameters plus a marker
    pub fn succeed(&self, service: &str, action: &str) {
        let calls = self.calls.clone();
        let (svc, act) = (service.to_string(), action.to_string());
        self.handlers.register(
            service,
            action,
            handler_fn(move |mut params| {
                calls.record(&svc, &act);
                let marker = format!("{act}_done");
                async move {
                    params.insert(marker, json!(true));
                    Ok(params)
                }
            }),
        );
    }

    /// Handler that records the call and always fails
    pub fn fail(&self, service: &str, action: &str, message: &str) {
        self.fail_times(service, action, usize::MAX, message);
    }

    /// Handler that fails its first `failures` calls, then succeeds
    pub fn fail_times(&self, service: &str, action: &str, failures: usize, message: &str) {
        let calls = self.calls.clone();
        let attempts = Arc::new(AtomicUsize::new(0));
        let (svc, act, message) = (service.to_string(), action.to_string(), message.to_string());
        self.handlers.register(
            service,
            action,
            handler_fn(move |params| {
                calls.record(&svc, &act);
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                let message = message.clone();
                async move {
                    if attempt < failures {
                        Err(anyhow::anyhow!(message))
                    } else {
                        Ok(params)
                    }
                }
            }),
        );
    }

    /// Handler that records the call and never returns on its own
    pub fn hang(&self, service: &str, action: &str) {
        let calls = self.calls.clone();
        let (svc, act) = (service.to_string(), action.to_string());
        self.handlers.register(
            service,
            action,
            handler_fn(move |params| {
                calls.record(&svc, &act);
                async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(params)
                }
            }),
        );
    }

    /// Handler whose first call never returns; later calls succeed
    pub fn hang_once(&self, service: &str, action: &str) {
        let calls = self.calls.clone();
        let attempts = Arc::new(AtomicUsize::new(0));
        let (svc, act) = (service.to_string(), action.to_string());
        self.handlers.register(
            service,
            action,
            handler_fn(move |params| {
                calls.record(&svc, &act);
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                    }
                    Ok(params)
                }
            }),
        );
    }

    /// Handler that records the call and panics
    pub fn panic(&self, service: &str, action: &str) {
        let calls = self.calls.clone();
        let (svc, act) = (service.to_string(), action.to_string());
        self.handlers.register(
            service,
            action,
            handler_fn(move |params| {
                calls.record(&svc, &act);
                async move {
                    if params.contains_key("never_present") {
                        return Ok(params);
                    }
                    panic!("handler blew up");
                }
            }),
        );
    }

    /// Poll until the saga reaches one of `statuses`
    pub async fn wait_for_status(&self, saga_id: Uuid, statuses: &[SagaStatus]) -> SagaTransaction {
        let deadline = Instant::now() + WAIT;
        loop {
            let saga = self
                .coordinator()
                .get_saga(saga_id)
                .await
                .expect("saga should exist");
            if statuses.contains(&saga.status) {
                return saga;
            }
            assert!(
                Instant::now() < deadline,
                "saga {saga_id} stuck in {} (wanted {statuses:?})",
                saga.status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until `condition` holds for the saga
    pub async fn wait_until<F>(&self, saga_id: Uuid, condition: F) -> SagaTransaction
    where
        F: Fn(&SagaTransaction) -> bool,
    {
        let deadline = Instant::now() + WAIT;
        loop {
            let saga = self
                .coordinator()
                .get_saga(saga_id)
                .await
                .expect("saga should exist");
            if condition(&saga) {
                return saga;
            }
            assert!(
                Instant::now() < deadline,
                "condition never held for saga {saga_id} (status {})",
                saga.status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn shutdown(self) {
        self.system.shutdown().await.expect("clean shutdown");
    }
}
