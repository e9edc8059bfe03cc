//! Compensation policies driving the reverse sweep

mod common;

use common::TestSaga;
use saga_core::compensation::{CompensationAction, CompensationStrategy};
use saga_core::constants::events;
use saga_core::{SagaStatus, StepStatus};
use serde_json::json;
use std::collections::HashMap;
use std::time::{Duration, Instant};

fn context(status: &str) -> HashMap<String, serde_json::Value> {
    HashMap::from([("status".to_string(), json!(status))])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_conditional_compensation_follows_business_context() {
    for (status, expect_compensation) in [("success", false), ("failed", true)] {
        let harness = TestSaga::start().await;
        harness.succeed("payment", "chargeCard");
        harness.succeed("payment", "refundCard");
        harness.fail("shipping", "createShipment", "no carrier");

        let policy = CompensationAction::builder("refund")
            .target("payment", "refundCard")
            .condition_expr("status == 'failed'")
            .build();
        let coordinator = harness.coordinator();
        let steps = vec![
            coordinator
                .step("charge", "payment", "chargeCard")
                .with_compensation_policy(policy),
            coordinator.step("ship", "shipping", "createShipment"),
        ];
        let saga = coordinator
            .create_saga("order_fulfillment", "corr-cond", "user-1", context(status), steps)
            .await
            .unwrap();
        coordinator.start_saga(saga.id).await.unwrap();

        let saga = harness
            .wait_for_status(saga.id, &[SagaStatus::Compensated])
            .await;
        if expect_compensation {
            assert_eq!(harness.calls.count("payment.refundCard"), 1);
            assert_eq!(saga.steps[0].status, StepStatus::Compensated);
        } else {
            assert_eq!(harness.calls.count("payment.refundCard"), 0);
            assert_eq!(saga.steps[0].status, StepStatus::Completed);
        }
        harness.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delayed_compensation_waits() {
    let harness = TestSaga::start().await;
    harness.succeed("inventory", "reserveItems");
    harness.succeed("inventory", "releaseItems");
    harness.fail("payment", "chargeCard", "declined");

    let policy = CompensationAction::builder("release")
        .target("inventory", "releaseItems")
        .delayed(150)
        .build();
    let coordinator = harness.coordinator();
    let steps = vec![
        coordinator
            .step("reserve", "inventory", "reserveItems")
            .with_compensation_policy(policy),
        coordinator.step("charge", "payment", "chargeCard"),
    ];
    let saga = coordinator
        .create_saga("order_fulfillment", "corr-delay", "user-1", HashMap::new(), steps)
        .await
        .unwrap();
    coordinator.start_saga(saga.id).await.unwrap();

    harness
        .wait_for_status(saga.id, &[SagaStatus::Compensating])
        .await;
    let compensating_since = Instant::now();
    assert_eq!(harness.calls.count("inventory.releaseItems"), 0);

    let saga = harness
        .wait_for_status(saga.id, &[SagaStatus::Compensated])
        .await;
    assert!(compensating_since.elapsed() >= Duration::from_millis(100));
    assert_eq!(harness.calls.count("inventory.releaseItems"), 1);
    assert_eq!(saga.steps[0].status, StepStatus::Compensated);

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_manual_compensation_is_queued_not_invoked() {
    let harness = TestSaga::start().await;
    harness.succeed("ledger", "postEntry");
    harness.succeed("inventory", "reserveItems");
    harness.succeed("inventory", "releaseItems");
    harness.fail("payment", "chargeCard", "declined");
    let mut lifecycle = harness.system.events().subscribe();

    let coordinator = harness.coordinator();
    let steps = vec![
        coordinator
            .step("post", "ledger", "postEntry")
            .with_compensation_policy(CompensationAction::manual("reverse_ledger_entry")),
        coordinator
            .step("reserve", "inventory", "reserveItems")
            .with_compensation("releaseItems"),
        coordinator.step("charge", "payment", "chargeCard"),
    ];
    let saga = coordinator
        .create_saga("order_fulfillment", "corr-manual", "user-1", HashMap::new(), steps)
        .await
        .unwrap();
    coordinator.start_saga(saga.id).await.unwrap();

    let saga = harness
        .wait_for_status(saga.id, &[SagaStatus::Compensated])
        .await;
    assert_eq!(saga.steps[0].status, StepStatus::Completed);
    assert!(saga.steps[0].manual_compensation_required);
    assert_eq!(saga.steps[1].status, StepStatus::Compensated);

    let queue = coordinator.manual_compensation_queue();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].step_name, "post");
    assert_eq!(queue[0].action_name, "reverse_ledger_entry");
    assert_eq!(queue[0].correlation_id, "corr-manual");

    let mut saw_manual_event = false;
    while let Ok(event) = lifecycle.try_recv() {
        saw_manual_event |= event.name == events::STEP_MANUAL_COMPENSATION_REQUIRED;
    }
    assert!(saw_manual_event);

    assert!(coordinator
        .acknowledge_manual_compensation(saga.id, "post")
        .is_some());
    assert!(coordinator.manual_compensation_queue().is_empty());

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ignore_strategy_skips_step() {
    let harness = TestSaga::start().await;
    harness.succeed("audit", "record");
    harness.succeed("audit", "erase");
    harness.fail("payment", "chargeCard", "declined");

    let policy = CompensationAction::builder("erase")
        .target("audit", "erase")
        .strategy(CompensationStrategy::Ignore)
        .build();
    let coordinator = harness.coordinator();
    let steps = vec![
        coordinator
            .step("audit", "audit", "record")
            .with_compensation_policy(policy),
        coordinator.step("charge", "payment", "chargeCard"),
    ];
    let saga = coordinator
        .create_saga("audited_payment", "corr-ignore", "user-1", HashMap::new(), steps)
        .await
        .unwrap();
    coordinator.start_saga(saga.id).await.unwrap();

    let saga = harness
        .wait_for_status(saga.id, &[SagaStatus::Compensated])
        .await;
    assert_eq!(harness.calls.count("audit.erase"), 0);
    assert_eq!(saga.steps[0].status, StepStatus::Completed);

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_compensation_does_not_halt_sweep() {
    let harness = TestSaga::start().await;
    harness.succeed("inventory", "reserveItems");
    harness.succeed("inventory", "releaseItems");
    harness.succeed("payment", "chargeCard");
    harness.fail("payment", "refundCard", "refund rejected");
    harness.fail("shipping", "createShipment", "no carrier");
    let mut lifecycle = harness.system.events().subscribe();

    let coordinator = harness.coordinator();
    let steps = vec![
        coordinator
            .step("reserve", "inventory", "reserveItems")
            .with_compensation("releaseItems"),
        coordinator
            .step("charge", "payment", "chargeCard")
            .with_compensation("refundCard"),
        coordinator.step("ship", "shipping", "createShipment"),
    ];
    let saga = coordinator
        .create_saga("order_fulfillment", "corr-cf", "user-1", HashMap::new(), steps)
        .await
        .unwrap();
    coordinator.start_saga(saga.id).await.unwrap();

    let saga = harness
        .wait_for_status(saga.id, &[SagaStatus::Compensated])
        .await;
    assert_eq!(saga.steps[1].status, StepStatus::CompensationFailed);
    assert_eq!(saga.steps[0].status, StepStatus::Compensated);
    assert_eq!(saga.compensation_failures, 1);
    assert!(saga.has_compensation_failures());
    // Single attempt without a retry policy
    assert_eq!(harness.calls.count("payment.refundCard"), 1);

    let mut compensated_event = None;
    while let Ok(event) = lifecycle.try_recv() {
        if event.name == events::SAGA_COMPENSATED {
            compensated_event = Some(event);
        }
    }
    let compensated_event = compensated_event.expect("saga.compensated published");
    assert_eq!(compensated_event.payload["compensation_failures"], json!(1));

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_compensation_retry_policy() {
    let harness = TestSaga::start().await;
    harness.succeed("payment", "chargeCard");
    harness.fail_times("payment", "refundCard", 2, "refund service busy");
    harness.fail("shipping", "createShipment", "no carrier");

    let policy = CompensationAction::builder("refund")
        .target("payment", "refundCard")
        .retry(2, 10)
        .build();
    let coordinator = harness.coordinator();
    let steps = vec![
        coordinator
            .step("charge", "payment", "chargeCard")
            .with_compensation_policy(policy),
        coordinator.step("ship", "shipping", "createShipment"),
    ];
    let saga = coordinator
        .create_saga("order_fulfillment", "corr-cr", "user-1", HashMap::new(), steps)
        .await
        .unwrap();
    coordinator.start_saga(saga.id).await.unwrap();

    let saga = harness
        .wait_for_status(saga.id, &[SagaStatus::Compensated])
        .await;
    assert_eq!(harness.calls.count("payment.refundCard"), 3);
    assert_eq!(saga.steps[0].compensation_attempts, 3);
    assert_eq!(saga.steps[0].status, StepStatus::Compensated);
    assert_eq!(saga.compensation_failures, 0);

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_compensation_parameters_include_forward_output() {
    let harness = TestSaga::start().await;
    harness.succeed("payment", "chargeCard");
    harness.fail("shipping", "createShipment", "no carrier");

    let seen = std::sync::Arc::new(parking_lot::Mutex::new(None));
    let captured = seen.clone();
    harness.handlers.register(
        "payment",
        "refundCard",
        saga_core::invocation::handler_fn(move |params| {
            *captured.lock() = Some(params.clone());
            async move { Ok(params) }
        }),
    );

    let policy = CompensationAction::builder("refund")
        .target("payment", "refundCard")
        .input_parameter("reason", json!("order_failed"))
        .build();
    let coordinator = harness.coordinator();
    let steps = vec![
        coordinator
            .step("charge", "payment", "chargeCard")
            .with_input("amount", json!(125))
            .with_compensation_policy(policy),
        coordinator.step("ship", "shipping", "createShipment"),
    ];
    let saga = coordinator
        .create_saga("order_fulfillment", "corr-params", "user-1", HashMap::new(), steps)
        .await
        .unwrap();
    coordinator.start_saga(saga.id).await.unwrap();
    harness
        .wait_for_status(saga.id, &[SagaStatus::Compensated])
        .await;

    let params = seen.lock().clone().expect("refund invoked");
    assert_eq!(params.get("amount"), Some(&json!(125)));
    assert_eq!(params.get("chargeCard_done"), Some(&json!(true)));
    assert_eq!(params.get("reason"), Some(&json!("order_failed")));

    harness.shutdown().await;
}
