use super::{
    errors::{invalid_transition, StateMachineResult},
    events::StepEvent,
    states::StepStatus,
};

/// Transition table for individual saga steps
#[derive(Debug, Clone, Copy, Default)]
pub struct StepStateMachine;

impl StepStateMachine {
    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: StepStatus,
        event: &StepEvent,
    ) -> StateMachineResult<StepStatus> {
        let target = match (current_state, event) {
            // Dispatch, including redispatch of a failed step with retries left
            (StepStatus::Pending, StepEvent::Dispatch) => StepStatus::Running,
            (StepStatus::Failed, StepEvent::Dispatch) => StepStatus::Running,

            (StepStatus::Running, StepEvent::Complete) => StepStatus::Completed,
            (StepStatus::Running, StepEvent::Fail(_)) => StepStatus::Failed,

            // Compensation only ever starts from a completed step
            (StepStatus::Completed, StepEvent::BeginCompensation) => StepStatus::Compensating,
            (StepStatus::Compensating, StepEvent::CompensationSucceeded) => StepStatus::Compensated,
            (StepStatus::Compensating, StepEvent::CompensationFailed(_)) => {
                StepStatus::CompensationFailed
            }

            (StepStatus::Pending, StepEvent::Skip) => StepStatus::Skipped,

            (from_state, event) => return Err(invalid_transition(from_state, event.event_type())),
        };

        Ok(target)
    }
}
