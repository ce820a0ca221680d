//! The parsed model decision and its wire shape.
//!
//! On the wire a decision is a single JSON object:
//!
//! ```json
//! {
//!   "thoughts": "...",
//!   "action": "tool_call",
//!   "action_input": {"tool": "get_weather", "params": {"city": "Paris"}},
//!   "status_title": "Checking the weather"
//! }
//! ```
//!
//! Internally the `action`/`action_input` pair becomes the typed
//! [`AgentAction`]. Mapping is deliberately lenient about key aliases the
//! models actually produce (`name`/`arguments` for `tool`/`params`) but
//! strict about the action set itself.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};

use crate::error::Error;

/// Maximum length of `status_title` in characters.
pub const MAX_STATUS_TITLE_CHARS: usize = 60;
/// Maximum length of `status_details` in characters.
pub const MAX_STATUS_DETAILS_CHARS: usize = 160;
/// Maximum length of `next_step_hint` in characters.
pub const MAX_NEXT_STEP_HINT_CHARS: usize = 60;

/// One tool request inside a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// The tool name, matched verbatim against the registry.
    pub tool: String,
    /// The call parameters.
    #[serde(default)]
    pub params: Value,
}

impl ToolInvocation {
    /// Create an invocation.
    #[must_use]
    pub fn new(tool: impl Into<String>, params: Value) -> Self {
        Self {
            tool: tool.into(),
            params,
        }
    }
}

/// The action half of a decision.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum AgentAction {
    /// Invoke one tool.
    ToolCall(ToolInvocation),
    /// Invoke several tools together; results come back in this order.
    MultiToolCall(Vec<ToolInvocation>),
    /// Record a plan without side effects.
    Plan(String),
    /// Terminate the run with a final answer.
    Finish {
        /// The final answer text.
        final_output: String,
    },
    /// Re-issue a prior tool call of the previous turn.
    Retry {
        /// The call to retry, when the model names one. Otherwise the most
        /// recent call of the previous turn is used.
        call_id: Option<String>,
    },
}

impl AgentAction {
    /// The wire tag of this action.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ToolCall(_) => "tool_call",
            Self::MultiToolCall(_) => "multi_tool_call",
            Self::Plan(_) => "plan",
            Self::Finish { .. } => "finish",
            Self::Retry { .. } => "retry",
        }
    }

    /// Returns `true` when this action terminates the run.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. })
    }
}

/// Optional public status fields of a decision, clamped to their limits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublicStatus {
    /// Short public title, at most 60 characters.
    pub status_title: Option<String>,
    /// Longer detail line, at most 160 characters.
    pub status_details: Option<String>,
    /// Hint about the next step, at most 60 characters.
    pub next_step_hint: Option<String>,
    /// Progress in percent, clamped to 0..=100.
    pub progress_pct: Option<u8>,
}

impl PublicStatus {
    /// Returns `true` when no field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.status_title.is_none()
            && self.status_details.is_none()
            && self.next_step_hint.is_none()
            && self.progress_pct.is_none()
    }
}

/// A parsed model decision.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmDecision {
    /// Model-visible rationale; treated as opaque text.
    pub thoughts: String,
    /// The requested action.
    pub action: AgentAction,
    /// Optional public status fields.
    pub status: PublicStatus,
}

impl LlmDecision {
    /// Create a decision with empty thoughts and status.
    #[must_use]
    pub fn new(action: AgentAction) -> Self {
        Self {
            thoughts: String::new(),
            action,
            status: PublicStatus::default(),
        }
    }

    /// Map a parsed JSON object to a decision.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LlmSchema`] when the object is missing `action` or
    /// its `action_input` does not fit the action's shape.
    pub fn from_value(value: &Value) -> Result<Self, Error> {
        let Some(object) = value.as_object() else {
            return Err(Error::schema("decision is not a JSON object"));
        };

        let thoughts = match object.get("thoughts") {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        let Some(action_tag) = object.get("action").and_then(Value::as_str) else {
            return Err(Error::schema("missing 'action' field"));
        };

        let input = object.get("action_input").cloned().unwrap_or(Value::Null);
        let action = parse_action(action_tag, input, &thoughts)?;

        Ok(Self {
            thoughts,
            action,
            status: parse_status(object),
        })
    }

    /// The wire-shaped `action_input` of this decision.
    #[must_use]
    pub fn action_input(&self) -> Value {
        match &self.action {
            AgentAction::ToolCall(invocation) => {
                json!({"tool": invocation.tool, "params": invocation.params})
            }
            AgentAction::MultiToolCall(invocations) => json!({
                "tool_calls": invocations
                    .iter()
                    .map(|inv| json!({"tool": inv.tool, "params": inv.params}))
                    .collect::<Vec<_>>()
            }),
            AgentAction::Plan(plan) => Value::String(plan.clone()),
            AgentAction::Finish { final_output } => json!({"final": final_output}),
            AgentAction::Retry { call_id } => match call_id {
                Some(id) => json!({"call_id": id}),
                None => Value::Object(Map::new()),
            },
        }
    }
}

fn parse_action(tag: &str, input: Value, thoughts: &str) -> Result<AgentAction, Error> {
    match tag {
        "tool_call" => Ok(AgentAction::ToolCall(parse_invocation(&input)?)),
        "multi_tool_call" => {
            let Some(calls) = input.get("tool_calls").and_then(Value::as_array) else {
                return Err(Error::schema(
                    "multi_tool_call requires action_input.tool_calls",
                ));
            };
            if calls.is_empty() {
                return Err(Error::schema("multi_tool_call requires at least one call"));
            }
            let invocations = calls
                .iter()
                .map(parse_invocation)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(AgentAction::MultiToolCall(invocations))
        }
        "plan" => {
            let plan = match input {
                Value::String(text) => text,
                Value::Object(ref map) => map
                    .get("plan")
                    .and_then(Value::as_str)
                    .map_or_else(|| input.to_string(), ToOwned::to_owned),
                Value::Null => thoughts.to_owned(),
                other => other.to_string(),
            };
            Ok(AgentAction::Plan(plan))
        }
        "finish" => {
            let final_output = match input {
                Value::String(text) => text,
                Value::Object(ref map) => match map.get("final") {
                    Some(Value::String(text)) => text.clone(),
                    Some(other) => other.to_string(),
                    None => {
                        return Err(Error::schema("finish requires action_input.final"));
                    }
                },
                _ => return Err(Error::schema("finish requires action_input.final")),
            };
            Ok(AgentAction::Finish { final_output })
        }
        "retry" => {
            let call_id = match input {
                Value::String(id) => Some(id),
                Value::Object(map) => map
                    .get("call_id")
                    .or_else(|| map.get("id"))
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned),
                _ => None,
            };
            Ok(AgentAction::Retry { call_id })
        }
        other => Err(Error::schema(format!("unknown action '{other}'"))),
    }
}

fn parse_invocation(input: &Value) -> Result<ToolInvocation, Error> {
    let Some(object) = input.as_object() else {
        return Err(Error::schema("tool call input is not an object"));
    };
    let tool = object
        .get("tool")
        .or_else(|| object.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| Error::schema("tool call is missing 'tool'"))?;
    let params = object
        .get("params")
        .or_else(|| object.get("arguments"))
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));
    Ok(ToolInvocation::new(tool, params))
}

fn parse_status(object: &Map<String, Value>) -> PublicStatus {
    let text_field = |key: &str, max: usize| {
        object
            .get(key)
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
            .map(|text| truncate_chars(text, max))
    };
    let progress_pct = object.get("progress_pct").and_then(|value| {
        value
            .as_f64()
            .map(|pct| pct.clamp(0.0, 100.0).round() as u8)
    });
    PublicStatus {
        status_title: text_field("status_title", MAX_STATUS_TITLE_CHARS),
        status_details: text_field("status_details", MAX_STATUS_DETAILS_CHARS),
        next_step_hint: text_field("next_step_hint", MAX_NEXT_STEP_HINT_CHARS),
        progress_pct,
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_owned()
    } else {
        text.chars().take(max).collect()
    }
}

// The persisted wire shape mirrors the model output contract exactly, so a
// stored decision can be replayed into prompts verbatim.
#[derive(Serialize, Deserialize)]
struct DecisionWire {
    #[serde(default)]
    thoughts: String,
    action: String,
    #[serde(default)]
    action_input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next_step_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    progress_pct: Option<u8>,
}

impl Serialize for LlmDecision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        DecisionWire {
            thoughts: self.thoughts.clone(),
            action: self.action.kind().to_owned(),
            action_input: self.action_input(),
            status_title: self.status.status_title.clone(),
            status_details: self.status.status_details.clone(),
            next_step_hint: self.status.next_step_hint.clone(),
            progress_pct: self.status.progress_pct,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for LlmDecision {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = DecisionWire::deserialize(deserializer)?;
        let mut object = Map::new();
        object.insert("thoughts".into(), Value::String(wire.thoughts));
        object.insert("action".into(), Value::String(wire.action));
        object.insert("action_input".into(), wire.action_input);
        if let Some(title) = wire.status_title {
            object.insert("status_title".into(), Value::String(title));
        }
        if let Some(details) = wire.status_details {
            object.insert("status_details".into(), Value::String(details));
        }
        if let Some(hint) = wire.next_step_hint {
            object.insert("next_step_hint".into(), Value::String(hint));
        }
        if let Some(pct) = wire.progress_pct {
            object.insert("progress_pct".into(), Value::from(pct));
        }
        Self::from_value(&Value::Object(object)).map_err(serde::de::Error::custom)
    }
}
