//! Layered configuration feeding a running system

mod common;

use saga_core::config::ConfigManager;
use saga_core::invocation::{handler_fn, HandlerRegistry, ServiceInvoker};
use saga_core::orchestration::SagaSystem;
use saga_core::{InMemorySagaStore, SagaStatus};
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn write_config(dir: &TempDir) {
    fs::write(
        dir.path().join("saga.toml"),
        r#"
[execution]
worker_pool_size = 2
shutdown_timeout_ms = 300

[backoff]
base_delay_ms = 5
max_delay_ms = 10

[saga]
default_max_retries = 1
default_step_timeout_ms = 1500

[invoker.services]
billing = "http://billing.internal:8080"
"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("saga.test.toml"),
        r#"
[saga]
default_max_retries = 2

[events]
enabled = false
"#,
    )
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bootstrap_from_layered_config() {
    let dir = TempDir::new().unwrap();
    write_config(&dir);

    let manager =
        ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
            .unwrap();
    assert_eq!(manager.environment(), "test");
    assert_eq!(manager.config().execution.worker_pool_size, 2);
    assert_eq!(manager.config().saga.default_max_retries, 2);
    assert!(!manager.config().events.enabled);

    let handlers = Arc::new(HandlerRegistry::new());
    let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = attempts.clone();
    handlers.register(
        "payment",
        "chargeCard",
        handler_fn(move |_params| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move { Err(anyhow::anyhow!("declined")) }
        }),
    );
    let invoker = Arc::new(ServiceInvoker::new(handlers, &manager.config().invoker).unwrap());
    let system = SagaSystem::bootstrap_from_config(
        &manager,
        invoker,
        Arc::new(InMemorySagaStore::new()),
    )
    .await
    .unwrap();
    assert!(!system.events().is_enabled());

    let coordinator = system.coordinator();
    let step = coordinator.step("charge", "payment", "chargeCard");
    assert_eq!(step.max_retries, 2);
    assert_eq!(step.timeout_ms, 1500);

    // Remote services from the registry resolve at creation time
    let remote = coordinator
        .create_saga(
            "invoice",
            "corr-remote",
            "user-1",
            HashMap::new(),
            vec![coordinator.step("invoice", "billing", "createInvoice")],
        )
        .await;
    assert!(remote.is_ok());

    let saga = coordinator
        .create_saga("payment", "corr-cfg", "user-1", HashMap::new(), vec![step])
        .await
        .unwrap();
    coordinator.start_saga(saga.id).await.unwrap();

    let deadline = std::time::Instant::now() + common::WAIT;
    loop {
        let current = coordinator.get_saga(saga.id).await.unwrap();
        if current.status == SagaStatus::Compensated {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "saga stuck in {}", current.status);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);

    system.shutdown().await.unwrap();
}

#[test]
fn test_invalid_service_url_fails_load() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("saga.toml"),
        "[invoker.services]\nbilling = \"not a url\"\n",
    )
    .unwrap();

    let result =
        ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
    assert!(result.is_err());
}
