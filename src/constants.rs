//! # System Constants
//!
//! Event names, default budgets and well-known strings shared by the saga
//! engine's components.

/// Lifecycle events published by the coordinator
pub mod events {
    // Saga lifecycle events
    pub const SAGA_CREATED: &str = "saga.created";
    pub const SAGA_STARTED: &str = "saga.started";
    pub const SAGA_COMPLETED: &str = "saga.completed";
    pub const SAGA_COMPENSATING: &str = "saga.compensating";
    pub const SAGA_COMPENSATED: &str = "saga.compensated";
    pub const SAGA_FAILED: &str = "saga.failed";

    // Step lifecycle events
    pub const STEP_COMPLETED: &str = "step.completed";
    pub const STEP_FAILED: &str = "step.failed";
    pub const STEP_RETRY_SCHEDULED: &str = "step.retry_scheduled";
    pub const STEP_COMPENSATED: &str = "step.compensated";
    pub const STEP_COMPENSATION_FAILED: &str = "step.compensation_failed";
    pub const STEP_MANUAL_COMPENSATION_REQUIRED: &str = "step.manual_compensation_required";
}

/// Compensation policy defaults
pub mod compensation {
    /// Priority for policies that do not set one
    pub const DEFAULT_PRIORITY: i32 = 100;
    /// Manual follow-ups sort after everything else unless told otherwise
    pub const MANUAL_PRIORITY: i32 = i32::MAX;
}

/// Engine-wide defaults, mirrored by `SagaConfig::default()`
pub mod system {
    pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
    pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;
    pub const DEFAULT_SAGA_TIMEOUT_MS: u64 = 300_000;
    pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 30_000;
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_WORKER_POOL_SIZE: usize = 16;
    pub const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 1_000;
    pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;
    pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
}

/// Failure reasons recorded on steps and sagas
pub mod reasons {
    pub const STEP_TIMEOUT: &str = "timeout";
    pub const SAGA_TIMEOUT: &str = "saga timed out";
}
