//! # Transaction Model
//!
//! Pure data with lifecycle methods. Every status change is routed through the
//! state machine tables in [`crate::state_machine`].

pub mod invocation_result;
pub mod saga_step;
pub mod saga_transaction;

// Re-export core models for easy access
pub use invocation_result::ServiceInvocationResult;
pub use saga_step::SagaStep;
pub use saga_transaction::SagaTransaction;
