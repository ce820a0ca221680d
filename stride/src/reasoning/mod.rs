//! Pre-action deliberation engines.
//!
//! An engine runs before the scheduler asks the model for its next
//! action and produces a conclusion the prompt can carry. Engines are
//! advisory: a failed pass (parse error, low confidence) never blocks the
//! turn; the scheduler just skips the injection and continues on the
//! model's direct output.

mod artifacts;
mod chain;
mod hybrid;
mod tree;

pub use artifacts::{
    NodeState, ReasoningChain, ReasoningStep, ReasoningTree, StepType, ThoughtNode, ThoughtType,
};
pub use chain::ChainOfThoughtEngine;
pub use hybrid::HybridEngine;
pub use tree::TreeOfThoughtsEngine;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::{ReasoningKind, RuntimeConfig};
use crate::error::{Error, Result};
use crate::llm::{LlmClient, LlmError, LlmReply, LlmRequest, parse};
use crate::message::ChatMessage;
use crate::tool::ToolDefinition;

/// The result of one deliberation pass.
#[derive(Debug, Clone, Default)]
pub struct ReasoningOutcome {
    /// Whether the pass produced a usable conclusion.
    pub success: bool,
    /// The conclusion, when one was drawn.
    pub conclusion: Option<String>,
    /// Aggregated confidence in `[0, 1]`.
    pub confidence: f64,
    /// Free-form metadata captured by the engine.
    pub metadata: Map<String, Value>,
    /// Chain artifact, when the engine ran a chain.
    pub chain: Option<ReasoningChain>,
    /// Tree artifact, when the engine ran a tree.
    pub tree: Option<ReasoningTree>,
    /// Why the pass failed, when `success` is false.
    pub error: Option<String>,
    /// Wall-clock time of the pass in milliseconds.
    pub execution_time_ms: u64,
}

/// The contract all engines share. The scheduler calls at most one engine
/// per turn; the choice is fixed at run start.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// Which engine this is.
    fn kind(&self) -> ReasoningKind;

    /// Run one deliberation pass.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when the run is cancelled mid-pass.
    /// Every other failure is reported inside the outcome with
    /// `success = false`.
    async fn reason(
        &self,
        goal: &str,
        context: &str,
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<ReasoningOutcome>;
}

/// Construct the engine selected by the configuration, if any.
#[must_use]
pub fn engine_for(
    config: &RuntimeConfig,
    llm: Arc<dyn LlmClient>,
) -> Option<Arc<dyn ReasoningEngine>> {
    match config.reasoning.kind {
        ReasoningKind::None => None,
        ReasoningKind::ChainOfThought => Some(Arc::new(ChainOfThoughtEngine::new(llm, config))),
        ReasoningKind::TreeOfThoughts => Some(Arc::new(TreeOfThoughtsEngine::new(llm, config))),
        ReasoningKind::Hybrid => Some(Arc::new(HybridEngine::new(llm, config))),
    }
}

/// The reply of one engine sub-step.
pub(crate) enum StepReply {
    /// A parsed JSON object.
    Value(Value),
    /// The reply was unusable, with the reason.
    Unusable(String),
}

/// One text-mode model call parsed leniently into JSON.
///
/// Only cancellation propagates as an error; transport failures,
/// timeouts, and unparseable replies come back as
/// [`StepReply::Unusable`] so engines can abort softly.
pub(crate) async fn complete_json(
    llm: &Arc<dyn LlmClient>,
    prompt: String,
    llm_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<StepReply> {
    let request = LlmRequest::new(vec![ChatMessage::user(prompt)]);
    let call = llm.complete(&request, cancel.child_token());
    let response = match tokio::time::timeout(llm_timeout, call).await {
        Err(_) => {
            return Ok(StepReply::Unusable(format!(
                "no reply within {}ms",
                llm_timeout.as_millis()
            )));
        }
        Ok(Err(LlmError::Cancelled)) => return Err(Error::Cancelled),
        Ok(Err(error)) => return Ok(StepReply::Unusable(error.to_string())),
        Ok(Ok(response)) => response,
    };
    let LlmReply::Text(text) = response.reply else {
        return Ok(StepReply::Unusable(
            "expected a text reply, got function calls".into(),
        ));
    };
    match parse::extract_json_candidate(&text).and_then(parse::parse_lenient) {
        Some(value) => Ok(StepReply::Value(value)),
        None => Ok(StepReply::Unusable(format!(
            "unparseable reply: {}",
            parse::excerpt(&text)
        ))),
    }
}

/// Render the tool catalog the way engine prompts expect it.
pub(crate) fn render_tools(tools: &[ToolDefinition]) -> String {
    if tools.is_empty() {
        return "(no tools available)".to_owned();
    }
    tools
        .iter()
        .map(|tool| format!("- {}: {}", tool.name, tool.description))
        .collect::<Vec<_>>()
        .join("\n")
}
