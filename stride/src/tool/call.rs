//! Tool call and result records as they are persisted in turn history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::CallId;

/// One requested tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Fresh call id.
    pub id: CallId,
    /// The tool name.
    #[serde(rename = "tool")]
    pub tool_name: String,
    /// Model-supplied parameters.
    pub params: Value,
    /// The turn this call belongs to.
    pub turn_index: usize,
}

impl ToolCall {
    /// Create a call with a fresh id.
    #[must_use]
    pub fn new(tool_name: impl Into<String>, params: Value, turn_index: usize) -> Self {
        Self {
            id: CallId::fresh(),
            tool_name: tool_name.into(),
            params,
            turn_index,
        }
    }
}

/// The failure half of an unsuccessful [`ToolResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFailure {
    /// The failure kind.
    pub kind: ToolFailureKind,
    /// The offending field for validation failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Human-readable message, surfaced to the model.
    pub message: String,
}

/// Failure kinds a tool invocation can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ToolFailureKind {
    /// Parameters failed schema validation; the call never ran.
    ValidationError,
    /// The invocation exceeded its time budget.
    Timeout,
    /// The invocation was cancelled.
    Cancelled,
    /// The tool raised an error of its own.
    ToolException,
    /// No tool of the requested name is registered.
    ToolNotFound,
}

impl ToolFailure {
    /// A validation failure naming the offending field.
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ToolFailureKind::ValidationError,
            field: Some(field.into()),
            message: message.into(),
        }
    }

    /// A timeout failure.
    #[must_use]
    pub fn timeout(budget: std::time::Duration) -> Self {
        Self {
            kind: ToolFailureKind::Timeout,
            field: None,
            message: format!(
                "tool did not finish within {}ms",
                budget.as_millis()
            ),
        }
    }

    /// A cancellation failure.
    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            kind: ToolFailureKind::Cancelled,
            field: None,
            message: "tool invocation was cancelled".into(),
        }
    }

    /// A tool-raised failure.
    #[must_use]
    pub fn exception(message: impl Into<String>) -> Self {
        Self {
            kind: ToolFailureKind::ToolException,
            field: None,
            message: message.into(),
        }
    }

    /// An unknown-tool failure.
    #[must_use]
    pub fn not_found(name: &str) -> Self {
        Self {
            kind: ToolFailureKind::ToolNotFound,
            field: None,
            message: format!("no tool named '{name}' is registered"),
        }
    }
}

/// The recorded outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Id of the call this result answers.
    pub id: CallId,
    /// The tool name.
    #[serde(rename = "tool")]
    pub tool_name: String,
    /// Whether the invocation succeeded.
    pub success: bool,
    /// Tool output, possibly truncated. `null` on failure.
    #[serde(default)]
    pub output: Value,
    /// Failure details when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,
    /// When the invocation started.
    pub started_utc: DateTime<Utc>,
    /// Invocation duration in milliseconds.
    pub duration_ms: u64,
    /// Whether `output` was truncated to the configured size budget.
    #[serde(default)]
    pub truncated: bool,
    /// Whether the loop detector flagged this call as part of a repeated
    /// failing pattern. Rendered as a `LOOP DETECTED` observation in the
    /// next prompt.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub loop_detected: bool,
}

impl ToolResult {
    /// Create a successful result.
    #[must_use]
    pub fn success(
        call: &ToolCall,
        output: Value,
        started_utc: DateTime<Utc>,
        duration_ms: u64,
    ) -> Self {
        Self {
            id: call.id.clone(),
            tool_name: call.tool_name.clone(),
            success: true,
            output,
            error: None,
            started_utc,
            duration_ms,
            truncated: false,
            loop_detected: false,
        }
    }

    /// Create a failed result.
    #[must_use]
    pub fn failure(
        call: &ToolCall,
        failure: ToolFailure,
        started_utc: DateTime<Utc>,
        duration_ms: u64,
    ) -> Self {
        Self {
            id: call.id.clone(),
            tool_name: call.tool_name.clone(),
            success: false,
            output: Value::Null,
            error: Some(failure),
            started_utc,
            duration_ms,
            truncated: false,
            loop_detected: false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_mints_fresh_ids() {
        let a = ToolCall::new("t", json!({}), 0);
        let b = ToolCall::new("t", json!({}), 0);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn result_carries_call_identity() {
        let call = ToolCall::new("get_weather", json!({"city": "Paris"}), 1);
        let result = ToolResult::success(&call, json!({"temp_c": 22}), Utc::now(), 12);
        assert_eq!(result.id, call.id);
        assert_eq!(result.tool_name, "get_weather");
        assert!(result.success);
    }

    #[test]
    fn serializes_with_wire_names() {
        let call = ToolCall::new("t", json!({}), 0);
        let value = serde_json::to_value(&call).unwrap();
        assert!(value.get("tool").is_some());
        assert!(value.get("tool_name").is_none());
    }

    #[test]
    fn loop_detected_is_skipped_when_false() {
        let call = ToolCall::new("t", json!({}), 0);
        let result = ToolResult::success(&call, Value::Null, Utc::now(), 1);
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("loop_detected").is_none());
    }

    #[test]
    fn failure_kinds_serialize_snake_case() {
        let failure = ToolFailure::validation("city", "expected string");
        let value = serde_json::to_value(&failure).unwrap();
        assert_eq!(value["kind"], "validation_error");
        assert_eq!(value["field"], "city");
    }

    #[test]
    fn result_roundtrip() {
        let call = ToolCall::new("t", json!({"a": 1}), 2);
        let result = ToolResult::failure(
            &call,
            ToolFailure::exception("boom"),
            Utc::now(),
            5,
        );
        let json = serde_json::to_string(&result).unwrap();
        let back: ToolResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
