//! Operation and session state machines
//!
//! Both state spaces advance monotonically; a transition backwards is a bug
//! and is rejected rather than silently applied.

use serde::{Deserialize, Serialize};

/// Lifecycle of one caller-initiated operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationState {
    /// Waiting for a concurrency permit
    Queued,
    /// Resolving a credential
    Resolving,
    /// Spawning the agent process
    Spawning,
    /// Streaming classified output
    Streaming,
    /// Terminal: completed with a result
    Completed,
    /// Terminal: surfaced a classified error
    Failed,
    /// Terminal: hard deadline exceeded and retry budget exhausted
    TimedOut,
    /// Terminal: cancelled by the caller
    Cancelled,
}

impl OperationState {
    /// Whether this state is terminal
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }
}

/// Lifecycle of one spawned agent process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Completed,
    Failed,
    TimedOut,
    Terminated,
}

/// State machine violations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// Transition not permitted by the state machine
    #[error("illegal state transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },
}

/// Transitions permitted from an operation state.
#[must_use]
pub fn operation_transitions(from: OperationState) -> Vec<OperationState> {
    use OperationState::*;
    match from {
        Queued => vec![Resolving, Cancelled, Failed],
        Resolving => vec![Spawning, Failed, TimedOut, Cancelled],
        Spawning => vec![Streaming, Failed, TimedOut, Cancelled],
        Streaming => vec![Completed, Failed, TimedOut, Cancelled],
        Completed | Failed | TimedOut | Cancelled => vec![],
    }
}

/// Transitions permitted from a session state.
#[must_use]
pub fn session_transitions(from: SessionState) -> Vec<SessionState> {
    use SessionState::*;
    match from {
        Idle => vec![Starting],
        Starting => vec![Running, Failed],
        Running => vec![Completed, Failed, TimedOut],
        Completed | Failed | TimedOut => vec![Terminated],
        Terminated => vec![],
    }
}

/// Validates an operation state transition.
///
/// # Errors
/// Returns [`StateError::IllegalTransition`] when the transition would move
/// backwards or skip a terminal state.
pub fn validate_operation_transition(
    from: OperationState,
    to: OperationState,
) -> Result<(), StateError> {
    if operation_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(StateError::IllegalTransition {
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        })
    }
}

/// Validates a session state transition.
///
/// # Errors
/// Returns [`StateError::IllegalTransition`] when the transition is not
/// permitted.
pub fn validate_session_transition(from: SessionState, to: SessionState) -> Result<(), StateError> {
    if session_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(StateError::IllegalTransition {
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_operation_states_have_no_exits() {
        for state in [
            OperationState::Completed,
            OperationState::Failed,
            OperationState::TimedOut,
            OperationState::Cancelled,
        ] {
            assert!(state.is_terminal());
            assert!(operation_transitions(state).is_empty());
        }
    }

    #[test]
    fn operation_state_rejects_reversal() {
        let err = validate_operation_transition(OperationState::Streaming, OperationState::Queued);
        assert!(matches!(err, Err(StateError::IllegalTransition { .. })));
    }

    #[test]
    fn session_follows_spawn_lifecycle() {
        validate_session_transition(SessionState::Idle, SessionState::Starting).unwrap();
        validate_session_transition(SessionState::Starting, SessionState::Running).unwrap();
        validate_session_transition(SessionState::Running, SessionState::TimedOut).unwrap();
        validate_session_transition(SessionState::TimedOut, SessionState::Terminated).unwrap();
    }

    #[test]
    fn session_cannot_resurrect() {
        let err = validate_session_transition(SessionState::Terminated, SessionState::Running);
        assert!(err.is_err());
    }

    #[test]
    fn retry_does_not_regress_operation_state() {
        // Local retries re-run resolution and spawn, but the operation state
        // is a monotone high-water mark and must not move backwards.
        let err = validate_operation_transition(OperationState::Streaming, OperationState::Spawning);
        assert!(err.is_err());
    }
}
