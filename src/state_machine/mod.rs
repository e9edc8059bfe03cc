// State machine module for saga orchestration
//
// Pure transition tables for saga transactions and their steps. Nothing here
// performs I/O; the models call into these before mutating their status.

pub mod errors;
pub mod events;
pub mod saga_state_machine;
pub mod states;
pub mod step_state_machine;

// Re-export main types for convenient access
pub use errors::{StateMachineError, StateMachineResult};
pub use events::{SagaEvent, StepEvent};
pub use saga_state_machine::SagaStateMachine;
pub use states::{SagaStatus, StepStatus};
pub use step_state_machine::StepStateMachine;
