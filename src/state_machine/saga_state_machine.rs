use super::{
    errors::{invalid_transition, StateMachineError, StateMachineResult},
    events::SagaEvent,
    states::SagaStatus,
};

/// Transition table for saga transactions
///
/// ```text
/// Created --start--> Running --complete--> Completed
/// Running --begin_compensation--> Compensating --finish_compensation--> Compensated
/// Running --fail--> Failed
/// Compensating --fail--> Failed
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SagaStateMachine;

impl SagaStateMachine {
    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: SagaStatus,
        event: &SagaEvent,
    ) -> StateMachineResult<SagaStatus> {
        if current_state.is_terminal() {
            return Err(StateMachineError::TerminalState {
                state: current_state.to_string(),
            });
        }

        let target = match (current_state, event) {
            (SagaStatus::Created, SagaEvent::Start) => SagaStatus::Running,

            (SagaStatus::Running, SagaEvent::Complete) => SagaStatus::Completed,

            (SagaStatus::Running, SagaEvent::BeginCompensation) => SagaStatus::Compensating,
            (SagaStatus::Compensating, SagaEvent::FinishCompensation) => SagaStatus::Compensated,

            (SagaStatus::Running, SagaEvent::Fail(_)) => SagaStatus::Failed,
            (SagaStatus::Compensating, SagaEvent::Fail(_)) => SagaStatus::Failed,

            (from_state, event) => return Err(invalid_transition(from_state, event.event_type())),
        };

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        assert_eq!(
            SagaStateMachine::determine_target_state(SagaStatus::Created, &SagaEvent::Start),
            Ok(SagaStatus::Running)
        );
        assert_eq!(
            SagaStateMachine::determine_target_state(SagaStatus::Running, &SagaEvent::Complete),
            Ok(SagaStatus::Completed)
        );
    }

    #[test]
    fn test_compensation_transitions() {
        assert_eq!(
            SagaStateMachine::determine_target_state(
                SagaStatus::Running,
                &SagaEvent::BeginCompensation
            ),
            Ok(SagaStatus::Compensating)
        );
        assert_eq!(
            SagaStateMachine::determine_target_state(
                SagaStatus::Compensating,
                &SagaEvent::FinishCompensation
            ),
            Ok(SagaStatus::Compensated)
        );
        assert_eq!(
            SagaStateMachine::determine_target_state(
                SagaStatus::Compensating,
                &SagaEvent::Fail("dispatch refused".to_string())
            ),
            Ok(SagaStatus::Failed)
        );
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let result = SagaStateMachine::determine_target_state(SagaStatus::Running, &SagaEvent::Start);
        assert!(matches!(
            result,
            Err(StateMachineError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_created_cannot_complete_or_fail() {
        assert!(
            SagaStateMachine::determine_target_state(SagaStatus::Created, &SagaEvent::Complete)
                .is_err()
        );
        assert!(SagaStateMachine::determine_target_state(
            SagaStatus::Created,
            &SagaEvent::Fail("x".to_string())
        )
        .is_err());
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        for terminal in SagaStatus::terminal_states() {
            for event in [
                SagaEvent::Start,
                SagaEvent::Complete,
                SagaEvent::BeginCompensation,
                SagaEvent::FinishCompensation,
                SagaEvent::Fail("late".to_string()),
            ] {
                assert!(matches!(
                    SagaStateMachine::determine_target_state(*terminal, &event),
                    Err(StateMachineError::TerminalState { .. })
                ));
            }
        }
    }
}
