//! # Orchestration Engine
//!
//! Execution engine and coordinator for saga transactions.
//!
//! ## Core Components
//!
//! - **SagaCoordinator**: owns the transaction store, drives the saga and step
//!   state machines, and is the only place transitions happen
//! - **ExecutionEngine**: asynchronous dispatch of forward and compensating
//!   invocations, the in-flight map, timeout checks and retry backoff
//! - **DispatchService**: bounded worker pool running invocations with panic
//!   isolation and cooperative cancellation
//! - **CompletionProcessor**: the single loop turning engine events into
//!   coordinator calls
//! - **SagaSystem**: bootstrap and lifecycle handle wiring the above together
//!
//! Steps of one transaction never run concurrently: the coordinator dispatches
//! the next step only after the previous one's outcome was applied, and the
//! in-flight map refuses a second execution for the same `(saga, step)` key.

pub mod bootstrap;
pub mod completion_processor;
pub mod dispatch_service;
pub mod execution_engine;
pub mod in_flight;
pub mod messages;
pub mod saga_coordinator;
pub mod scheduler;

pub use bootstrap::SagaSystem;
pub use completion_processor::CompletionProcessor;
pub use dispatch_service::DispatchService;
pub use execution_engine::ExecutionEngine;
pub use in_flight::{InFlightExecution, InFlightRegistry, InFlightSnapshot};
pub use messages::{DispatchMessage, EngineEvent, ExecutionKey, ExecutionKind, StepInvocation};
pub use saga_coordinator::SagaCoordinator;
pub use scheduler::Scheduler;
