//! Error types for the stride runtime.
//!
//! Two layers of failure exist in the runtime:
//!
//! - **Observation-level** failures (a tool raising an error, the model
//!   emitting broken JSON) never surface here. They become structured
//!   observations the next model call sees, and the loop continues.
//! - **Run-level** failures terminate a run. Those are the variants of
//!   [`Error`], and they reach the caller inside
//!   [`RunResult`](crate::agent::RunResult) as a [`RunError`] pair.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Run-level errors of the agent runtime.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// State already exists for this agent id but was created for a
    /// different goal. The stored goal is immutable for the life of the
    /// state.
    #[error("GoalMismatch: state for '{agent_id}' was created for goal '{existing_goal}'")]
    GoalMismatch {
        /// The agent id whose state was loaded.
        agent_id: String,
        /// The goal the existing state was created with.
        existing_goal: String,
    },

    /// The turn budget was exhausted without a terminal action.
    #[error("MaxTurnsExceeded: no terminal action after {turns} turns")]
    MaxTurnsExceeded {
        /// Number of turns taken when the budget was hit.
        turns: usize,
    },

    /// The run was cancelled through its cancellation token.
    #[error("Cancelled: the run was cancelled")]
    Cancelled,

    /// The run exceeded its total wall-clock budget.
    #[error("TotalTimeout: the run exceeded its budget of {budget_ms}ms")]
    TotalTimeout {
        /// The configured budget in milliseconds.
        budget_ms: u64,
    },

    /// Network or transport failure while talking to the model. The only
    /// retryable variant; the communicator retries it with backoff before
    /// converting it to a run-level error.
    #[error("LlmTransport: {message}")]
    LlmTransport {
        /// The underlying transport error message.
        message: String,
    },

    /// The model returned no content at all.
    #[error("LlmEmptyResponse: the model returned no content")]
    LlmEmptyResponse,

    /// The model output could not be parsed as JSON even after lenient
    /// fixes were applied.
    #[error("LlmParse: {message}")]
    LlmParse {
        /// Why parsing failed.
        message: String,
        /// A bounded excerpt of the raw model output.
        raw_excerpt: String,
    },

    /// The model output parsed as JSON but violated the decision contract
    /// (missing `action`, malformed `action_input`, ...).
    #[error("LlmSchema: {message}")]
    LlmSchema {
        /// Which part of the contract was violated.
        message: String,
    },

    /// No model response arrived within the per-request budget.
    #[error("LlmTimeout: no response within {budget_ms}ms")]
    LlmTimeout {
        /// The configured per-request budget in milliseconds.
        budget_ms: u64,
    },

    /// The model named a tool that is not registered.
    #[error("ToolNotFound: no tool named '{name}' is registered")]
    ToolNotFound {
        /// The requested tool name.
        name: String,
    },

    /// Model-supplied parameters failed schema validation.
    #[error("Validation: {field}: {message}")]
    Validation {
        /// The offending field (instance path).
        field: String,
        /// The validation error message.
        message: String,
    },

    /// A tool invocation did not finish within its budget.
    #[error("ToolTimeout: '{tool}' did not finish within {budget_ms}ms")]
    ToolTimeout {
        /// The tool that timed out.
        tool: String,
        /// The configured per-invocation budget in milliseconds.
        budget_ms: u64,
    },

    /// A tool raised an error of its own.
    #[error("ToolException: '{tool}': {message}")]
    ToolException {
        /// The tool that failed.
        tool: String,
        /// The error message raised by the tool.
        message: String,
    },

    /// A reasoning sub-step reply could not be parsed.
    #[error("ReasoningParse: {message}")]
    ReasoningParse {
        /// Why parsing failed.
        message: String,
    },

    /// Reasoning completed but below the configured confidence floor.
    #[error("ReasoningLowConfidence: confidence {confidence:.2} below threshold {threshold:.2}")]
    ReasoningLowConfidence {
        /// The aggregated confidence of the reasoning pass.
        confidence: f64,
        /// The configured minimum.
        threshold: f64,
    },

    /// The state store failed to load or persist a state.
    #[error("StatePersist: {message}")]
    StatePersist {
        /// The underlying store error message.
        message: String,
    },
}

impl Error {
    /// Create a transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::LlmTransport {
            message: message.into(),
        }
    }

    /// Create a parse error with a bounded raw excerpt.
    #[must_use]
    pub fn parse(message: impl Into<String>, raw_excerpt: impl Into<String>) -> Self {
        Self::LlmParse {
            message: message.into(),
            raw_excerpt: raw_excerpt.into(),
        }
    }

    /// Create a schema-violation error.
    #[must_use]
    pub fn schema(message: impl Into<String>) -> Self {
        Self::LlmSchema {
            message: message.into(),
        }
    }

    /// Create a persistence error.
    #[must_use]
    pub fn persist(message: impl Into<String>) -> Self {
        Self::StatePersist {
            message: message.into(),
        }
    }

    /// Create a tool-raised error.
    #[must_use]
    pub fn tool_exception(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolException {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// The serializable kind tag of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::GoalMismatch { .. } => ErrorKind::GoalMismatch,
            Self::MaxTurnsExceeded { .. } => ErrorKind::MaxTurnsExceeded,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::TotalTimeout { .. } => ErrorKind::TotalTimeout,
            Self::LlmTransport { .. } => ErrorKind::LlmTransportError,
            Self::LlmEmptyResponse => ErrorKind::LlmEmptyResponse,
            Self::LlmParse { .. } => ErrorKind::LlmParseError,
            Self::LlmSchema { .. } => ErrorKind::LlmSchemaError,
            Self::LlmTimeout { .. } => ErrorKind::LlmTimeout,
            Self::ToolNotFound { .. } => ErrorKind::ToolNotFound,
            Self::Validation { .. } => ErrorKind::ValidationError,
            Self::ToolTimeout { .. } => ErrorKind::Timeout,
            Self::ToolException { .. } => ErrorKind::ToolException,
            Self::ReasoningParse { .. } => ErrorKind::ReasoningParseError,
            Self::ReasoningLowConfidence { .. } => ErrorKind::ReasoningLowConfidence,
            Self::StatePersist { .. } => ErrorKind::StatePersistError,
        }
    }

    /// Whether the communicator may retry the operation that produced this
    /// error. Only transport errors qualify.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::LlmTransport { .. })
    }
}

/// Serializable error kind tags, the `kind` half of the `{kind, message}`
/// pair carried by run results and persisted observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorKind {
    /// See [`Error::GoalMismatch`].
    GoalMismatch,
    /// See [`Error::MaxTurnsExceeded`].
    MaxTurnsExceeded,
    /// See [`Error::Cancelled`].
    Cancelled,
    /// See [`Error::TotalTimeout`].
    TotalTimeout,
    /// See [`Error::LlmTransport`].
    LlmTransportError,
    /// See [`Error::LlmEmptyResponse`].
    LlmEmptyResponse,
    /// See [`Error::LlmParse`].
    LlmParseError,
    /// See [`Error::LlmSchema`].
    LlmSchemaError,
    /// See [`Error::LlmTimeout`].
    LlmTimeout,
    /// See [`Error::ToolNotFound`].
    ToolNotFound,
    /// See [`Error::Validation`].
    ValidationError,
    /// See [`Error::ToolTimeout`].
    Timeout,
    /// See [`Error::ToolException`].
    ToolException,
    /// See [`Error::ReasoningParse`].
    ReasoningParseError,
    /// See [`Error::ReasoningLowConfidence`].
    ReasoningLowConfidence,
    /// See [`Error::StatePersist`].
    StatePersistError,
}

/// The `{kind, message}` pair surfaced to callers in run results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    /// The error kind tag.
    pub kind: ErrorKind,
    /// The human-readable message.
    pub message: String,
}

impl From<&Error> for RunError {
    fn from(error: &Error) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(
            Error::transport("connection reset").kind(),
            ErrorKind::LlmTransportError
        );
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            Error::MaxTurnsExceeded { turns: 3 }.kind(),
            ErrorKind::MaxTurnsExceeded
        );
    }

    #[test]
    fn only_transport_is_retryable() {
        assert!(Error::transport("reset").is_retryable());
        assert!(!Error::LlmEmptyResponse.is_retryable());
        assert!(!Error::LlmTimeout { budget_ms: 1000 }.is_retryable());
    }

    #[test]
    fn run_error_carries_kind_and_message() {
        let err = Error::tool_exception("get_weather", "boom");
        let run_err = RunError::from(&err);
        assert_eq!(run_err.kind, ErrorKind::ToolException);
        assert!(run_err.message.contains("get_weather"));
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ValidationError).unwrap();
        assert_eq!(json, r#""validation_error""#);
        let json = serde_json::to_string(&ErrorKind::MaxTurnsExceeded).unwrap();
        assert_eq!(json, r#""max_turns_exceeded""#);
    }
}
