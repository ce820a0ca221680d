//! Observing a run in real time through the event stream.
//!
//! ```bash
//! cargo run --example streaming_events
//! ```

#![allow(clippy::print_stdout, clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use stride::prelude::*;

struct MockModel {
    replies: Mutex<Vec<String>>,
}

#[async_trait]
impl LlmClient for MockModel {
    async fn complete(
        &self,
        _request: &LlmRequest,
        _cancel: CancellationToken,
    ) -> std::result::Result<LlmResponse, LlmError> {
        match self.replies.lock().unwrap().pop() {
            Some(text) => Ok(LlmResponse::text(text)),
            None => Err(LlmError::Empty),
        }
    }
}

struct Lookup;

#[async_trait]
impl Tool for Lookup {
    fn name(&self) -> &str {
        "lookup"
    }

    fn description(&self) -> &str {
        "Look up a fact"
    }

    async fn invoke(
        &self,
        _params: Value,
        _cancel: CancellationToken,
    ) -> std::result::Result<Value, ToolError> {
        Ok(json!({"fact": "the answer is 42"}))
    }
}

#[tokio::main]
async fn main() {
    let replies = vec![
        json!({
            "thoughts": "done",
            "action": "finish",
            "action_input": {"final": "The answer is 42."}
        }),
        json!({
            "thoughts": "look it up first",
            "action": "tool_call",
            "action_input": {"tool": "lookup", "params": {}}
        }),
    ];
    let model = MockModel {
        replies: Mutex::new(replies.into_iter().map(|v| v.to_string()).collect()),
    };

    let mut tools = ToolRegistry::new();
    tools.register(Lookup);

    let runtime = Arc::new(AgentRuntime::new(
        Arc::new(model),
        Arc::new(MemoryStateStore::new()),
    ));

    let mut events = runtime.run_streamed(
        "streaming-demo".into(),
        "Find the answer".into(),
        Arc::new(tools),
        CancellationToken::new(),
    );

    while let Some(event) = events.next().await {
        match event {
            AgentEvent::RunStarted { goal, .. } => println!("run started: {goal}"),
            AgentEvent::StepStarted { turn_index } => println!("turn {turn_index}"),
            AgentEvent::ToolCallCompleted { tool, success, .. } => {
                println!("  tool {tool}: success={success}");
            }
            AgentEvent::RunCompleted {
                succeeded,
                total_turns,
                ..
            } => println!("run completed: succeeded={succeeded} turns={total_turns}"),
            _ => {}
        }
    }
}
