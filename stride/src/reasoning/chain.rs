//! Chain-of-thought: four ordered sub-steps, each a separate model call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{ReasoningKind, RuntimeConfig};
use crate::error::Result;
use crate::llm::LlmClient;
use crate::tool::ToolDefinition;

use super::artifacts::{ReasoningChain, ReasoningStep, StepType};
use super::{ReasoningEngine, ReasoningOutcome, StepReply, complete_json, render_tools};

const ANALYSIS_PROMPT: &str = "You are the analysis step of a structured reasoning pass.\n\
GOAL: {goal}\n\nCONTEXT:\n{context}\n\nAVAILABLE TOOLS:\n{tools}\n\n\
Analyze the goal: what is being asked, what information is present, and \
what is missing. Reply with a single JSON object:\n\
{\"reasoning\": \"...\", \"confidence\": 0.0, \"insights\": [\"...\"]}";

const PLANNING_PROMPT: &str = "You are the planning step of a structured reasoning pass.\n\
GOAL: {goal}\n\nPRIOR STEPS:\n{previous}\n\n\
Lay out the concrete steps that would achieve the goal, including which \
tools to use and in what order. Reply with a single JSON object:\n\
{\"reasoning\": \"...\", \"confidence\": 0.0, \"insights\": [\"...\"]}";

const DECISION_PROMPT: &str = "You are the decision step of a structured reasoning pass.\n\
GOAL: {goal}\n\nPRIOR STEPS:\n{previous}\n\n\
Commit to one strategy from the plan and justify the choice. Reply with a \
single JSON object:\n\
{\"reasoning\": \"...\", \"confidence\": 0.0, \"insights\": [\"...\"]}";

const EVALUATION_PROMPT: &str = "You are the evaluation step of a structured reasoning pass.\n\
GOAL: {goal}\n\nPRIOR STEPS:\n{previous}\n\n\
Judge the chosen strategy, name its main risk, and state the overall \
conclusion of this reasoning pass. Reply with a single JSON object:\n\
{\"reasoning\": \"...\", \"confidence\": 0.0, \"insights\": [\"...\"], \"conclusion\": \"...\"}";

const VALIDATOR_PROMPT: &str = "You are validating the result of a reasoning pass.\n\
GOAL: {goal}\n\nCONCLUSION:\n{conclusion}\n\n\
Is this conclusion a coherent, actionable answer to the goal? Reply with a \
single JSON object: {\"is_valid\": true, \"error\": null}";

/// The linear Analysis, Planning, Decision, Evaluation engine.
pub struct ChainOfThoughtEngine {
    llm: Arc<dyn LlmClient>,
    llm_timeout: Duration,
    max_steps: usize,
    validate: bool,
    min_confidence: f64,
}

impl ChainOfThoughtEngine {
    /// Create an engine from the runtime configuration.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>, config: &RuntimeConfig) -> Self {
        Self {
            llm,
            llm_timeout: config.llm_timeout,
            max_steps: config.reasoning.max_reasoning_steps,
            validate: config.reasoning.enable_reasoning_validation,
            min_confidence: config.reasoning.min_reasoning_confidence,
        }
    }

    fn step_specs(&self) -> Vec<(StepType, &'static str)> {
        let specs = [
            (StepType::Analysis, ANALYSIS_PROMPT),
            (StepType::Planning, PLANNING_PROMPT),
            (StepType::Decision, DECISION_PROMPT),
            (StepType::Evaluation, EVALUATION_PROMPT),
        ];
        specs
            .into_iter()
            .take(self.max_steps.clamp(1, specs.len()))
            .collect()
    }
}

impl std::fmt::Debug for ChainOfThoughtEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainOfThoughtEngine")
            .field("max_steps", &self.max_steps)
            .field("validate", &self.validate)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ReasoningEngine for ChainOfThoughtEngine {
    fn kind(&self) -> ReasoningKind {
        ReasoningKind::ChainOfThought
    }

    async fn reason(
        &self,
        goal: &str,
        context: &str,
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<ReasoningOutcome> {
        let started = Instant::now();
        let mut chain = ReasoningChain::new(goal);
        let mut conclusion: Option<String> = None;

        for (position, (step_type, template)) in self.step_specs().into_iter().enumerate() {
            let prompt = template
                .replace("{goal}", goal)
                .replace("{context}", context)
                .replace("{tools}", &render_tools(tools))
                .replace("{previous}", &render_steps(&chain));

            let step_started = Instant::now();
            let reply = complete_json(&self.llm, prompt, self.llm_timeout, cancel).await?;
            let value = match reply {
                StepReply::Value(value) => value,
                StepReply::Unusable(reason) => {
                    warn!(step = ?step_type, reason = %reason, "chain step aborted");
                    return Ok(aborted(chain, reason, started));
                }
            };

            let Some(step) = parse_step(&value, position + 1, step_type, &step_started) else {
                let reason = format!("step reply is missing 'reasoning': {value}");
                warn!(step = ?step_type, "chain step reply malformed");
                return Ok(aborted(chain, reason, started));
            };
            debug!(step = ?step_type, confidence = step.confidence, "chain step completed");
            if let Some(text) = value.get("conclusion").and_then(Value::as_str) {
                conclusion = Some(text.to_owned());
            }
            chain.push_step(step);
        }

        chain.finalize(conclusion, started.elapsed().as_millis() as u64);
        let confidence = chain.final_confidence;

        let mut success = true;
        let mut error = None;
        if self.validate {
            let is_valid = self.run_validator(goal, &chain, cancel).await?;
            if !is_valid && confidence < self.min_confidence {
                success = false;
                error = Some(format!(
                    "reasoning confidence {confidence:.2} below threshold {:.2}",
                    self.min_confidence
                ));
            }
        }

        let mut metadata = serde_json::Map::new();
        metadata.insert("steps".into(), Value::from(chain.steps.len()));
        metadata.insert(
            "insights".into(),
            Value::from(
                chain
                    .steps
                    .iter()
                    .map(|step| step.insights.len())
                    .sum::<usize>(),
            ),
        );

        Ok(ReasoningOutcome {
            success,
            conclusion: chain.final_conclusion.clone(),
            confidence,
            metadata,
            chain: Some(chain),
            tree: None,
            error,
            execution_time_ms: started.elapsed().as_millis() as u64,
        })
    }
}

impl ChainOfThoughtEngine {
    /// The validator is advisory: an unusable reply counts as valid.
    async fn run_validator(
        &self,
        goal: &str,
        chain: &ReasoningChain,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let prompt = VALIDATOR_PROMPT
            .replace("{goal}", goal)
            .replace("{conclusion}", chain.final_conclusion.as_deref().unwrap_or(""));
        match complete_json(&self.llm, prompt, self.llm_timeout, cancel).await? {
            StepReply::Value(value) => {
                Ok(value.get("is_valid").and_then(Value::as_bool).unwrap_or(true))
            }
            StepReply::Unusable(reason) => {
                warn!(reason = %reason, "validator reply unusable; treating as valid");
                Ok(true)
            }
        }
    }
}

fn aborted(mut chain: ReasoningChain, reason: String, started: Instant) -> ReasoningOutcome {
    let elapsed = started.elapsed().as_millis() as u64;
    chain.finalize(None, elapsed);
    let confidence = chain.final_confidence;
    ReasoningOutcome {
        success: false,
        conclusion: None,
        confidence,
        metadata: serde_json::Map::new(),
        chain: Some(chain),
        tree: None,
        error: Some(reason),
        execution_time_ms: elapsed,
    }
}

fn parse_step(
    value: &Value,
    step_number: usize,
    step_type: StepType,
    step_started: &Instant,
) -> Option<ReasoningStep> {
    let reasoning = value.get("reasoning")?.as_str()?.to_owned();
    let confidence = value
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.5)
        .clamp(0.0, 1.0);
    let insights = value
        .get("insights")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();
    Some(ReasoningStep {
        step_number,
        reasoning,
        step_type,
        confidence,
        insights,
        execution_time_ms: step_started.elapsed().as_millis() as u64,
        created_utc: Utc::now(),
    })
}

fn render_steps(chain: &ReasoningChain) -> String {
    if chain.steps.is_empty() {
        return "(none yet)".to_owned();
    }
    chain
        .steps
        .iter()
        .map(|step| {
            format!(
                "{}. [{:?}] {} (confidence {:.2})",
                step.step_number, step.step_type, step.reasoning, step.confidence
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
