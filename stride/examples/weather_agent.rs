//! A complete run against a mocked model: one tool call, then finish.
//!
//! The runtime is provider-agnostic; this example scripts the model
//! replies so it runs offline.
//!
//! ```bash
//! cargo run --example weather_agent
//! ```

#![allow(clippy::print_stdout, clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use stride::prelude::*;

/// Replays a fixed list of text replies, one per model call.
struct MockModel {
    replies: Mutex<Vec<String>>,
}

impl MockModel {
    fn new(replies: Vec<Value>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().rev().map(|v| v.to_string()).collect()),
        }
    }
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

#[derive(serde::Deserialize, schemars::JsonSchema)]
#[allow(dead_code)]
struct WeatherParams {
    /// City to look up.
    city: String,
}

struct GetWeather;

#[async_trait]
impl Tool for GetWeather {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Look up the current weather for a city"
    }

    fn parameters(&self) -> Value {
        schema_for::<WeatherParams>()
    }

    async fn invoke(
        &self,
        params: Value,
        _cancel: CancellationToken,
    ) -> std::result::Result<Value, ToolError> {
        let city = params["city"].as_str().unwrap_or("somewhere");
        Ok(json!({"city": city, "temp_c": 22, "sky": "clear"}))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let model = MockModel::new(vec![
        json!({
            "thoughts": "I need the current weather before I can answer.",
            "action": "tool_call",
            "action_input": {"tool": "get_weather", "params": {"city": "Paris"}},
            "status_title": "Checking the weather"
        }),
        json!({
            "thoughts": "The tool reported 22 degrees and clear skies.",
            "action": "finish",
            "action_input": {"final": "It is 22°C and clear in Paris."},
            "progress_pct": 100
        }),
    ]);

    let mut tools = ToolRegistry::new();
    tools.register(GetWeather);

    let runtime = AgentRuntime::new(Arc::new(model), Arc::new(MemoryStateStore::new()));
    runtime.bus().subscribe_fn(|event: &AgentEvent| {
        if let AgentEvent::StatusUpdate { status_title, .. } = event {
            println!("[status] {status_title}");
        }
    });

    let result = runtime
        .run(
            "weather-agent",
            "Get the weather in Paris",
            &tools,
            CancellationToken::new(),
        )
        .await;

    println!("succeeded: {}", result.succeeded);
    println!("turns: {}", result.total_turns);
    println!("answer: {}", result.final_output.unwrap_or_default());
}
