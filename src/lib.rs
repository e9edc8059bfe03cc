#![allow(clippy::doc_markdown)] // Allow technical terms in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Saga Core
//!
//! Coordination engine for multi-step business transactions that span
//! independently owned services.
//!
//! ## Overview
//!
//! A saga advances through an ordered list of steps, each invoking a forward
//! action on some service. A step that fails is retried with exponential
//! backoff until its budget is spent; after that, every previously completed
//! step is undone through its compensating action, strictly in reverse order.
//!
//! ## Module Organization
//!
//! - [`models`] - `SagaTransaction`, `SagaStep` and invocation results
//! - [`state_machine`] - Saga and step transition tables
//! - [`compensation`] - Compensation policies and conditions
//! - [`invocation`] - The `Invoker` seam: in-process handlers and remote services
//! - [`orchestration`] - Execution engine, coordinator and system bootstrap
//! - [`store`] - Transaction registry abstraction and in-memory store
//! - [`events`] - Lifecycle event publishing
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use saga_core::config::SagaConfig;
//! use saga_core::invocation::{handler_fn, HandlerRegistry, ServiceInvoker};
//! use saga_core::orchestration::SagaSystem;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SagaConfig::default();
//!
//! let handlers = Arc::new(HandlerRegistry::new());
//! handlers.register("inventory", "reserveItems", handler_fn(|params| async move { Ok(params) }));
//! handlers.register("inventory", "releaseItems", handler_fn(|params| async move { Ok(params) }));
//! let invoker = Arc::new(ServiceInvoker::new(handlers, &config.invoker)?);
//!
//! let system = SagaSystem::bootstrap_in_memory(config, invoker).await?;
//! let coordinator = system.coordinator();
//!
//! let steps = vec![coordinator
//!     .step("reserve", "inventory", "reserveItems")
//!     .with_compensation("releaseItems")];
//! let saga = coordinator
//!     .create_saga("order_fulfillment", "order-42", "user-7", HashMap::new(), steps)
//!     .await?;
//! coordinator.start_saga(saga.id).await?;
//!
//! system.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod compensation;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod invocation;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod state_machine;
pub mod store;

pub use compensation::{
    CompensationAction, CompensationCondition, CompensationStrategy, ManualCompensation,
};
pub use config::{ConfigManager, SagaConfig};
pub use error::{InvocationError, SagaError, SagaResult};
pub use events::{EventPublisher, LifecycleEvent};
pub use invocation::{Invoker, ServiceInvoker};
pub use models::{SagaStep, SagaTransaction, ServiceInvocationResult};
pub use orchestration::{ExecutionEngine, SagaCoordinator, SagaSystem};
pub use state_machine::{SagaStatus, StepStatus};
pub use store::{InMemorySagaStore, SagaStore};
