//! Prompt assembly: the fixed framework system message plus one user
//! message carrying the goal, the tool catalog, the action contract, and
//! the condensed turn history.

use serde_json::{Value, json};

use crate::config::RuntimeConfig;
use crate::message::ChatMessage;
use crate::state::{AgentState, Turn};
use crate::tool::{ToolDefinition, ToolResult};

/// The framework-owned system prompt. Identical for every turn of every
/// run; it encodes the output contract and nothing else.
pub const SYSTEM_PROMPT: &str = "\
You are an autonomous agent that achieves a user goal by thinking and \
acting in turns. On every turn you reply with EXACTLY ONE JSON object and \
nothing else: no code fences, no prose before or after.\n\
\n\
The object has the fields \"thoughts\" (your reasoning, free text), \
\"action\" (one of: tool_call, multi_tool_call, plan, finish, retry) and \
\"action_input\" (the action's payload). Tool names are used exactly as \
listed in the catalog, without any prefix.\n\
\n\
Use \"tool_call\" to run one tool, \"multi_tool_call\" to run several \
tools at once, \"plan\" to write down a plan without acting, \"retry\" to \
re-issue a failed call from the previous turn, and \"finish\" when the \
goal is achieved or cannot be achieved.\n\
\n\
Tool results arrive in the HISTORY section of the next turn. When a \
result says a call keeps failing, change your approach instead of \
repeating it.";

/// Maximum characters of `thoughts` kept in a summary line.
const SUMMARY_THOUGHTS_CHARS: usize = 100;

/// Builds the ordered message list for one model call.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_recent_turns: usize,
    summarize: bool,
    emit_public_status: bool,
}

impl PromptBuilder {
    /// Create a builder from the runtime configuration.
    #[must_use]
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            max_recent_turns: config.max_recent_turns,
            summarize: config.enable_history_summarization,
            emit_public_status: config.emit_public_status,
        }
    }

    /// Assemble the message list: the framework system message, the
    /// caller's additional messages in order, then one user message.
    #[must_use]
    pub fn build(
        &self,
        state: &AgentState,
        tools: &[ToolDefinition],
        reasoning_note: Option<&str>,
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(state.additional_messages.len() + 2);
        messages.push(ChatMessage::system(SYSTEM_PROMPT));
        messages.extend(state.additional_messages.iter().cloned());
        messages.push(ChatMessage::user(self.user_message(state, tools, reasoning_note)));
        messages
    }

    fn user_message(
        &self,
        state: &AgentState,
        tools: &[ToolDefinition],
        reasoning_note: Option<&str>,
    ) -> String {
        let mut out = String::new();
        out.push_str(&format!("GOAL: {}\n", state.goal));

        if let Some(note) = reasoning_note {
            out.push_str("\nREASONING:\n");
            out.push_str(note);
            out.push('\n');
        }

        out.push_str("\nTOOL CATALOG:\n");
        if tools.is_empty() {
            out.push_str("(no tools available)\n");
        } else {
            for tool in tools {
                out.push_str(&render_tool(tool));
                out.push('\n');
            }
        }

        out.push_str(
            "\nACTIONS:\n\
             - \"tool_call\": run one tool. action_input: {\"tool\": \"<name>\", \"params\": {...}}\n\
             - \"multi_tool_call\": run several tools together. action_input must match exactly: \
             {\"tool_calls\":[{\"tool\":\"<name>\",\"params\":{...}}, ...]}\n\
             - \"plan\": record a plan, no side effects. action_input: free text.\n\
             - \"finish\": terminal. action_input: {\"final\": \"<answer>\"}\n\
             - \"retry\": re-issue a prior call. action_input: {\"call_id\": \"<id>\"}\n",
        );

        if self.emit_public_status {
            out.push_str(
                "\nSTATUS FIELDS (optional, shown to the user): \"status_title\" \
                 (max 60 chars), \"status_details\" (max 160 chars), \
                 \"next_step_hint\" (max 60 chars), \"progress_pct\" (0-100).\n",
            );
        }

        out.push_str("\nHISTORY:\n");
        out.push_str(&self.render_history(state));

        out.push_str(
            "\nFORMAT: reply with a single JSON object: \
             {\"thoughts\": \"...\", \"action\": \"...\", \"action_input\": ...}. \
             JSON only.\n",
        );
        out
    }

    fn render_history(&self, state: &AgentState) -> String {
        if state.turns.is_empty() {
            return "(no turns yet)\n".to_owned();
        }
        let full_from = if self.summarize {
            state.turns.len().saturating_sub(self.max_recent_turns)
        } else {
            0
        };
        let mut out = String::new();
        for turn in &state.turns[..full_from] {
            out.push_str(&summarize_turn(turn));
            out.push('\n');
        }
        for turn in &state.turns[full_from..] {
            out.push_str(&render_turn(turn));
        }
        out
    }
}

fn render_tool(tool: &ToolDefinition) -> String {
    let mut schema = tool.parameters.clone();
    if let Value::Object(map) = &mut schema {
        map.entry("description")
            .or_insert_with(|| Value::String(tool.description.clone()));
    }
    format!("{}: {schema}", tool.name)
}

fn render_turn(turn: &Turn) -> String {
    let mut out = format!("TURN {}:\n", turn.index);
    match (&turn.llm_message, &turn.llm_error) {
        (Some(decision), _) => {
            let wire = serde_json::to_string(decision).unwrap_or_else(|_| "{}".into());
            out.push_str(&format!("LLM: {wire}\n"));
        }
        (None, Some(failure)) => {
            let observation = json!({"error": failure.error, "raw_excerpt": failure.raw_excerpt});
            out.push_str(&format!("LLM ERROR: {observation}\n"));
        }
        (None, None) => out.push_str("LLM: (none)\n"),
    }

    if let Some(call) = &turn.tool_call {
        let rendered = serde_json::to_string(call).unwrap_or_else(|_| "{}".into());
        out.push_str(&format!("TOOL CALL: {rendered}\n"));
    }
    if let Some(result) = &turn.tool_result {
        out.push_str(&format!("RESULT: {}\n", observation_for(result)));
    }
    if let Some(calls) = &turn.tool_calls {
        let rendered = serde_json::to_string(calls).unwrap_or_else(|_| "[]".into());
        out.push_str(&format!("TOOL CALLS: {rendered}\n"));
    }
    if let Some(results) = &turn.tool_results {
        for (i, result) in results.iter().enumerate() {
            out.push_str(&format!("RESULT {i}: {}\n", observation_for(result)));
        }
    }
    out
}

/// The observation the model sees for one tool result.
fn observation_for(result: &ToolResult) -> String {
    if result.loop_detected {
        let last_error = result
            .error
            .as_ref()
            .map_or_else(|| "(no error)".to_owned(), |e| e.message.clone());
        return format!(
            "LOOP DETECTED: '{}' has been called repeatedly with the same \
             parameters and keeps failing. Do not repeat this call. Change \
             the parameters, use a different tool, or finish. Last error: {last_error}",
            result.tool_name
        );
    }
    if result.success {
        json!({
            "tool": result.tool_name,
            "success": true,
            "output": result.output,
            "truncated": result.truncated,
        })
        .to_string()
    } else {
        json!({
            "tool": result.tool_name,
            "success": false,
            "error": result.error,
        })
        .to_string()
    }
}

/// One-line summary of an old turn.
fn summarize_turn(turn: &Turn) -> String {
    let (action, thoughts) = match (&turn.llm_message, &turn.llm_error) {
        (Some(decision), _) => (decision.action.kind(), decision.thoughts.as_str()),
        (None, Some(failure)) => ("invalid", failure.error.as_str()),
        (None, None) => ("none", ""),
    };
    let tools = {
        let names = turn.executed_tools();
        if names.is_empty() {
            "-".to_owned()
        } else {
            names.join(",")
        }
    };
    let results = turn.all_results();
    let succeeded = results.iter().filter(|result| result.success).count();
    format!(
        "SUMMARY: LLM: {action} - {} | TOOL(s): {tools} | RESULT(s): {succeeded}/{} success",
        elide(thoughts, SUMMARY_THOUGHTS_CHARS),
        results.len(),
    )
}

/// A compact recap of the most recent turns, used as context for the
/// reasoning engines.
#[must_use]
pub fn condensed_history(state: &AgentState, max_turns: usize) -> String {
    if state.turns.is_empty() {
        return "(no turns yet)".to_owned();
    }
    let from = state.turns.len().saturating_sub(max_turns);
    state.turns[from..]
        .iter()
        .map(summarize_turn)
        .collect::<Vec<_>>()
        .join("\n")
}

fn elide(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_owned()
    } else {
        let mut out: String = text.chars().take(max).collect();
        out.push_str("...");
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::llm::{AgentAction, LlmDecision, ToolInvocation};
    use crate::message::Role;
    use crate::tool::{ToolCall, ToolFailure};
    use chrono::Utc;
    use serde_json::json;

    fn state_with_turns(n: usize) -> AgentState {
        let mut state = AgentState::new("a", "find the answer");
        for index in 0..n {
            let mut turn = Turn::new(index).with_decision(LlmDecision::new(
                AgentAction::ToolCall(ToolInvocation::new("search", json!({"q": index}))),
            ));
            let call = ToolCall::new("search", json!({"q": index}), index);
            let result = ToolResult::success(&call, json!({"hits": 3}), Utc::now(), 5);
            turn.record_single(call, result);
            state.push_turn(turn);
        }
        state
    }

    fn weather_defs() -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "get_weather".into(),
            description: "Look up the weather".into(),
            parameters: json!({"type": "object", "properties": {"city": {"type": "string"}}}),
        }]
    }

    #[test]
    fn system_message_is_first_and_fixed() {
        let builder = PromptBuilder::new(&RuntimeConfig::default());
        let state = state_with_turns(2);
        let first = builder.build(&state, &weather_defs(), None);
        let second = builder.build(&state, &weather_defs(), None);
        assert_eq!(first[0].role, Role::System);
        assert_eq!(first[0].content, SYSTEM_PROMPT);
        assert_eq!(first[0], second[0]);
    }

    #[test]
    fn additional_messages_sit_between_system_and_user() {
        let builder = PromptBuilder::new(&RuntimeConfig::default());
        let state = AgentState::new("a", "g").with_additional_messages(vec![
            ChatMessage::user("background one"),
            ChatMessage::assistant("noted"),
        ]);
        let messages = builder.build(&state, &[], None);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].content, "background one");
        assert_eq!(messages[2].content, "noted");
        assert_eq!(messages[3].role, Role::User);
    }

    #[test]
    fn user_message_carries_goal_catalog_and_contract() {
        let builder = PromptBuilder::new(&RuntimeConfig::default());
        let state = AgentState::new("a", "find the answer");
        let messages = builder.build(&state, &weather_defs(), None);
        let user = &messages.last().unwrap().content;

        assert!(user.contains("GOAL: find the answer"));
        assert!(user.contains("TOOL CATALOG:"));
        assert!(user.contains("get_weather: {"));
        assert!(user.contains(r#"{"tool_calls":[{"tool":"<name>","params":{...}}, ...]}"#));
        assert!(user.contains("HISTORY:\n(no turns yet)"));
        assert!(user.contains("JSON only."));
    }

    #[test]
    fn status_rules_follow_config() {
        let mut config = RuntimeConfig::default();
        let state = AgentState::new("a", "g");
        let with_status = PromptBuilder::new(&config).build(&state, &[], None);
        assert!(with_status.last().unwrap().content.contains("STATUS FIELDS"));

        config.emit_public_status = false;
        let without = PromptBuilder::new(&config).build(&state, &[], None);
        assert!(!without.last().unwrap().content.contains("STATUS FIELDS"));
    }

    #[test]
    fn recent_window_bounds_full_detail_turns() {
        let mut config = RuntimeConfig::default();
        config.max_recent_turns = 3;
        let builder = PromptBuilder::new(&config);
        let state = state_with_turns(8);
        let user = builder.build(&state, &[], None).pop().unwrap().content;

        assert_eq!(user.matches("TURN ").count(), 3);
        assert_eq!(user.matches("SUMMARY: ").count(), 5);
        // The most recent turns are the detailed ones.
        assert!(user.contains("TURN 7:"));
        assert!(!user.contains("TURN 0:"));
    }

    #[test]
    fn summarization_can_be_disabled() {
        let mut config = RuntimeConfig::default();
        config.max_recent_turns = 3;
        config.enable_history_summarization = false;
        let builder = PromptBuilder::new(&config);
        let state = state_with_turns(8);
        let user = builder.build(&state, &[], None).pop().unwrap().content;

        assert_eq!(user.matches("TURN ").count(), 8);
        assert_eq!(user.matches("SUMMARY: ").count(), 0);
    }

    #[test]
    fn summary_line_has_the_documented_shape() {
        let turn = &state_with_turns(1).turns[0];
        let summary = summarize_turn(turn);
        assert!(summary.starts_with("SUMMARY: LLM: tool_call - "));
        assert!(summary.contains("| TOOL(s): search |"));
        assert!(summary.ends_with("RESULT(s): 1/1 success"));
    }

    #[test]
    fn loop_detected_result_renders_the_annotation() {
        let call = ToolCall::new("search", json!({"q": 1}), 0);
        let mut result = ToolResult::failure(
            &call,
            ToolFailure::exception("service down"),
            Utc::now(),
            3,
        );
        result.loop_detected = true;
        let observation = observation_for(&result);
        assert!(observation.starts_with("LOOP DETECTED:"));
        assert!(observation.contains("service down"));
        assert!(observation.contains("Do not repeat this call"));
    }

    #[test]
    fn parse_failure_turn_renders_the_error_observation() {
        let turn = Turn::parse_failure(0, "invalid JSON", "{broken");
        let rendered = render_turn(&turn);
        assert!(rendered.contains("LLM ERROR:"));
        assert!(rendered.contains("invalid JSON"));
        assert!(rendered.contains("{broken"));
    }

    #[test]
    fn long_thoughts_are_elided_in_summaries() {
        let mut state = AgentState::new("a", "g");
        let mut decision = LlmDecision::new(AgentAction::Plan("p".into()));
        decision.thoughts = "t".repeat(300);
        state.push_turn(Turn::new(0).with_decision(decision));
        let summary = summarize_turn(&state.turns[0]);
        assert!(summary.contains(&format!("{}...", "t".repeat(SUMMARY_THOUGHTS_CHARS))));
    }
}
