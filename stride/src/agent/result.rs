//! The user-visible outcome of one run.

use serde::Serialize;

use crate::error::{Error, RunError};
use crate::state::AgentState;

/// The terminal outcome of a run, returned by
/// [`AgentRuntime::run`](super::AgentRuntime::run).
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// Whether the model finished with a final answer.
    pub succeeded: bool,
    /// The final answer, when `succeeded` is true.
    pub final_output: Option<String>,
    /// The typed error, when `succeeded` is false.
    pub error: Option<RunError>,
    /// Number of turns taken.
    pub total_turns: usize,
    /// The state as it stood when the run ended.
    pub state: AgentState,
}

impl RunResult {
    pub(crate) fn success(state: AgentState, final_output: String) -> Self {
        Self {
            succeeded: true,
            final_output: Some(final_output),
            error: None,
            total_turns: state.turns.len(),
            state,
        }
    }

    pub(crate) fn failure(state: AgentState, error: &Error) -> Self {
        Self {
            succeeded: false,
            final_output: None,
            error: Some(RunError::from(error)),
            total_turns: state.turns.len(),
            state,
        }
    }

    /// Returns `true` when the run finished with a final answer.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn success_carries_output_and_turn_count() {
        let result = RunResult::success(AgentState::new("a", "g"), "done".into());
        assert!(result.is_success());
        assert_eq!(result.final_output.as_deref(), Some("done"));
        assert_eq!(result.total_turns, 0);
        assert!(result.error.is_none());
    }

    #[test]
    fn failure_carries_typed_error() {
        let error = Error::MaxTurnsExceeded { turns: 3 };
        let result = RunResult::failure(AgentState::new("a", "g"), &error);
        assert!(!result.is_success());
        assert_eq!(result.error.as_ref().map(|e| e.kind), Some(ErrorKind::MaxTurnsExceeded));
    }
}
