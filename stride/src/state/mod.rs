//! Durable per-goal agent state: the append-only turn history.
//!
//! `AgentState` is the single durable record of one `(agent_id, goal)`
//! session. The scheduler owns the in-memory copy during a run; a
//! [`StateStore`] owns the persisted copy. Unknown JSON fields survive a
//! load/save round-trip through the flattened `extra` maps, so newer
//! writers can add fields without older readers dropping them.

mod store;

pub use store::{FileStateStore, MemoryStateStore, StateStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::TurnId;
use crate::llm::LlmDecision;
use crate::message::ChatMessage;
use crate::reasoning::{ReasoningChain, ReasoningTree};
use crate::tool::{ToolCall, ToolResult};

/// The durable record for one `(agent_id, goal)` session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Opaque agent identifier.
    pub agent_id: String,
    /// The original user goal; immutable for the life of the state.
    pub goal: String,
    /// Messages injected after the framework system prompt; immutable
    /// during a run.
    #[serde(default)]
    pub additional_messages: Vec<ChatMessage>,
    /// Append-only turn history with contiguous indices from zero.
    #[serde(default)]
    pub turns: Vec<Turn>,
    /// Chain artifact from the most recent reasoning pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_reasoning_chain: Option<ReasoningChain>,
    /// Tree artifact from the most recent reasoning pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_reasoning_tree: Option<ReasoningTree>,
    /// Free-form key/value metadata captured by the reasoning engine.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub reasoning_metadata: Map<String, Value>,
    /// Creation time.
    pub created_utc: DateTime<Utc>,
    /// Last mutation time, refreshed on every persisted turn.
    pub last_updated_utc: DateTime<Utc>,
    /// Unknown fields preserved for forward compatibility.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AgentState {
    /// Create a fresh state for a goal.
    #[must_use]
    pub fn new(agent_id: impl Into<String>, goal: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.into(),
            goal: goal.into(),
            additional_messages: Vec::new(),
            turns: Vec::new(),
            current_reasoning_chain: None,
            current_reasoning_tree: None,
            reasoning_metadata: Map::new(),
            created_utc: now,
            last_updated_utc: now,
            extra: Map::new(),
        }
    }

    /// Attach caller-supplied messages at creation time.
    #[must_use]
    pub fn with_additional_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.additional_messages = messages;
        self
    }

    /// The index the next appended turn must carry.
    #[must_use]
    pub fn next_turn_index(&self) -> usize {
        self.turns.len()
    }

    /// Append a turn and refresh the update timestamp. The turn's index
    /// must equal [`AgentState::next_turn_index`]; history is gap-free by
    /// construction.
    pub fn push_turn(&mut self, turn: Turn) {
        debug_assert_eq!(turn.index, self.turns.len(), "turn indices must be contiguous");
        self.turns.push(turn);
        self.last_updated_utc = Utc::now();
    }

    /// Whether the turn indices are contiguous from zero. Used by stores
    /// and tests to reject corrupted snapshots.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.turns
            .iter()
            .enumerate()
            .all(|(expected, turn)| turn.index == expected)
    }

    /// The most recent tool call, searching backwards across turns.
    #[must_use]
    pub fn last_tool_call(&self) -> Option<&ToolCall> {
        self.turns.iter().rev().find_map(|turn| {
            turn.tool_calls
                .as_ref()
                .and_then(|calls| calls.last())
                .or(turn.tool_call.as_ref())
        })
    }

    /// Find a tool call by id, searching backwards across turns.
    #[must_use]
    pub fn find_tool_call(&self, call_id: &str) -> Option<&ToolCall> {
        self.turns.iter().rev().find_map(|turn| {
            turn.single_and_batch_calls()
                .into_iter()
                .find(|call| call.id.as_str() == call_id)
        })
    }
}

/// Observation recorded when the model reply could not be parsed; shown
/// back to the model so it can self-correct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmFailureNote {
    /// Why the reply was unusable.
    pub error: String,
    /// A bounded excerpt of the raw reply.
    pub raw_excerpt: String,
}

/// One iteration of the think-act-observe loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Position in the history, unique and contiguous.
    pub index: usize,
    /// Fresh opaque id.
    pub id: TurnId,
    /// The parsed model decision, or `None` when the reply was unusable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_message: Option<LlmDecision>,
    /// Present when the reply could not be parsed or acted on (broken
    /// JSON, empty response, a retry with no prior call to re-issue).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_error: Option<LlmFailureNote>,
    /// Single-tool path: the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    /// Single-tool path: the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
    /// Multi-tool path: the calls, in model order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Multi-tool path: the results, index-aligned with `tool_calls`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolResult>>,
    /// Creation time.
    pub created_utc: DateTime<Utc>,
    /// Unknown fields preserved for forward compatibility.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Turn {
    /// Create an empty turn at the given index.
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self {
            index,
            id: TurnId::fresh(),
            llm_message: None,
            llm_error: None,
            tool_call: None,
            tool_result: None,
            tool_calls: None,
            tool_results: None,
            created_utc: Utc::now(),
            extra: Map::new(),
        }
    }

    /// Attach the parsed decision.
    #[must_use]
    pub fn with_decision(mut self, decision: LlmDecision) -> Self {
        self.llm_message = Some(decision);
        self
    }

    /// Create the pseudo-turn recorded for an unusable model reply.
    #[must_use]
    pub fn parse_failure(
        index: usize,
        error: impl Into<String>,
        raw_excerpt: impl Into<String>,
    ) -> Self {
        let mut turn = Self::new(index);
        turn.llm_error = Some(LlmFailureNote {
            error: error.into(),
            raw_excerpt: raw_excerpt.into(),
        });
        turn
    }

    /// Record a single-tool execution.
    pub fn record_single(&mut self, call: ToolCall, result: ToolResult) {
        self.tool_call = Some(call);
        self.tool_result = Some(result);
    }

    /// Record a multi-tool execution. Calls and results must be
    /// index-aligned.
    pub fn record_batch(&mut self, calls: Vec<ToolCall>, results: Vec<ToolResult>) {
        debug_assert_eq!(calls.len(), results.len());
        self.tool_calls = Some(calls);
        self.tool_results = Some(results);
    }

    /// All calls of this turn, whichever path was taken.
    #[must_use]
    pub fn single_and_batch_calls(&self) -> Vec<&ToolCall> {
        match (&self.tool_call, &self.tool_calls) {
            (Some(call), _) => vec![call],
            (None, Some(calls)) => calls.iter().collect(),
            (None, None) => Vec::new(),
        }
    }

    /// All results of this turn, whichever path was taken.
    #[must_use]
    pub fn all_results(&self) -> Vec<&ToolResult> {
        match (&self.tool_result, &self.tool_results) {
            (Some(result), _) => vec![result],
            (None, Some(results)) => results.iter().collect(),
            (None, None) => Vec::new(),
        }
    }

    /// Names of the tools executed this turn.
    #[must_use]
    pub fn executed_tools(&self) -> Vec<&str> {
        self.single_and_batch_calls()
            .into_iter()
            .map(|call| call.tool_name.as_str())
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::llm::{AgentAction, ToolInvocation};
    use serde_json::json;

    fn sample_turn(index: usize) -> Turn {
        let mut turn = Turn::new(index).with_decision(LlmDecision::new(AgentAction::ToolCall(
            ToolInvocation::new("get_weather", json!({"city": "Paris"})),
        )));
        let call = ToolCall::new("get_weather", json!({"city": "Paris"}), index);
        let result = ToolResult::success(&call, json!({"temp_c": 22}), Utc::now(), 9);
        turn.record_single(call, result);
        turn
    }

    #[test]
    fn turn_indices_stay_contiguous() {
        let mut state = AgentState::new("a", "goal");
        state.push_turn(sample_turn(0));
        state.push_turn(sample_turn(1));
        assert_eq!(state.next_turn_index(), 2);
        assert!(state.is_consistent());
    }

    #[test]
    fn inconsistent_state_is_detected() {
        let mut state = AgentState::new("a", "goal");
        state.turns.push(sample_turn(3));
        assert!(!state.is_consistent());
    }

    #[test]
    fn last_tool_call_prefers_latest_turn() {
        let mut state = AgentState::new("a", "goal");
        state.push_turn(sample_turn(0));
        let mut batch_turn = Turn::new(1);
        let calls = vec![
            ToolCall::new("a", json!({}), 1),
            ToolCall::new("b", json!({}), 1),
        ];
        let results = calls
            .iter()
            .map(|call| ToolResult::success(call, Value::Null, Utc::now(), 1))
            .collect();
        batch_turn.record_batch(calls, results);
        state.push_turn(batch_turn);

        assert_eq!(state.last_tool_call().unwrap().tool_name, "b");
    }

    #[test]
    fn find_tool_call_by_id() {
        let mut state = AgentState::new("a", "goal");
        let turn = sample_turn(0);
        let id = turn.tool_call.as_ref().unwrap().id.clone();
        state.push_turn(turn);
        assert!(state.find_tool_call(id.as_str()).is_some());
        assert!(state.find_tool_call("missing").is_none());
    }

    #[test]
    fn state_roundtrip_preserves_unknown_fields() {
        let mut state = AgentState::new("a", "goal");
        state.push_turn(sample_turn(0));
        let mut value = serde_json::to_value(&state).unwrap();
        value["future_field"] = json!({"x": 1});
        value["turns"][0]["turn_annotation"] = json!("kept");

        let loaded: AgentState = serde_json::from_value(value).unwrap();
        assert_eq!(loaded.extra["future_field"], json!({"x": 1}));
        assert_eq!(loaded.turns[0].extra["turn_annotation"], "kept");

        let again = serde_json::to_value(&loaded).unwrap();
        assert_eq!(again["future_field"], json!({"x": 1}));
        assert_eq!(again["turns"][0]["turn_annotation"], "kept");
    }

    #[test]
    fn parse_failure_turn_has_no_decision() {
        let turn = Turn::parse_failure(0, "invalid JSON", "{broken");
        assert!(turn.llm_message.is_none());
        assert_eq!(turn.llm_error.as_ref().unwrap().error, "invalid JSON");
        let value = serde_json::to_value(&turn).unwrap();
        assert!(value.get("llm_message").is_none());
        assert_eq!(value["llm_error"]["raw_excerpt"], "{broken");
    }

    #[test]
    fn executed_tools_lists_batch_names() {
        let mut turn = Turn::new(0);
        let calls = vec![
            ToolCall::new("x", json!({}), 0),
            ToolCall::new("y", json!({}), 0),
        ];
        let results = calls
            .iter()
            .map(|call| ToolResult::success(call, Value::Null, Utc::now(), 1))
            .collect();
        turn.record_batch(calls, results);
        assert_eq!(turn.executed_tools(), vec!["x", "y"]);
    }
}
