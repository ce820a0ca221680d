//! The turn scheduler.
//!
//! [`AgentRuntime::run`] drives one goal from its first turn to a
//! terminal outcome:
//!
//! 1. Load or create the [`AgentState`] for the agent id
//! 2. Check the turn budget, the total-timeout deadline, and cancellation
//! 3. Optionally run the configured reasoning engine
//! 4. Build the prompt and ask the model for a decision
//! 5. Dispatch the decided action (tools, plan, retry, finish)
//! 6. Persist the completed turn atomically and emit events
//! 7. Loop
//!
//! Parse failures and tool errors stay inside the loop as observations;
//! only scheduler- and store-level failures terminate the run.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::event::{AgentEvent, EventBus};
use crate::llm::{AgentAction, LlmClient, LlmCommunicator, LlmDecision, ModelReply};
use crate::loop_detector::LoopDetector;
use crate::message::ChatMessage;
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::prompt::{self, PromptBuilder};
use crate::reasoning::{self, ReasoningEngine};
use crate::state::{AgentState, LlmFailureNote, StateStore, Turn};
use crate::tool::{ToolCall, ToolDispatcher, ToolRegistry};

use super::result::RunResult;

/// How many recent turns feed the reasoning engine's context.
const REASONING_CONTEXT_TURNS: usize = 5;

/// The runtime that executes agent runs.
///
/// One runtime may serve many concurrent runs; runs for different agent
/// ids share only the read-only pieces (configuration, event bus,
/// metrics, loop detector, provider adapter).
pub struct AgentRuntime {
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn StateStore>,
    bus: Arc<EventBus>,
    metrics: Arc<MetricsCollector>,
    detector: Arc<LoopDetector>,
    reasoning: Option<Arc<dyn ReasoningEngine>>,
    config: RuntimeConfig,
}

impl AgentRuntime {
    /// Create a runtime with the default configuration.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>, store: Arc<dyn StateStore>) -> Self {
        let config = RuntimeConfig::default();
        let detector = Arc::new(LoopDetector::new(
            config.max_tool_call_history,
            config.consecutive_failure_threshold,
        ));
        Self {
            llm,
            store,
            bus: Arc::new(EventBus::new()),
            metrics: Arc::new(MetricsCollector::new()),
            detector,
            reasoning: None,
            config,
        }
    }

    /// Replace the configuration. Rebuilds the loop detector and selects
    /// the reasoning engine the configuration names.
    #[must_use]
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.detector = Arc::new(LoopDetector::new(
            config.max_tool_call_history,
            config.consecutive_failure_threshold,
        ));
        self.reasoning = reasoning::engine_for(&config, Arc::clone(&self.llm));
        self.config = config;
        self
    }

    /// Install a custom reasoning engine, overriding the configured one.
    #[must_use]
    pub fn with_reasoning_engine(mut self, engine: Arc<dyn ReasoningEngine>) -> Self {
        self.reasoning = Some(engine);
        self
    }

    /// The event bus this runtime publishes to.
    #[must_use]
    pub const fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// A snapshot of the runtime's metrics.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Execute a run to its terminal outcome.
    pub async fn run(
        &self,
        agent_id: &str,
        goal: &str,
        tools: &ToolRegistry,
        cancel: CancellationToken,
    ) -> RunResult {
        self.run_with_messages(agent_id, goal, Vec::new(), tools, cancel)
            .await
    }

    /// Execute a run, supplying additional messages used when the state
    /// is first created. An existing state keeps its own messages.
    pub async fn run_with_messages(
        &self,
        agent_id: &str,
        goal: &str,
        additional_messages: Vec<ChatMessage>,
        tools: &ToolRegistry,
        cancel: CancellationToken,
    ) -> RunResult {
        let communicator = LlmCommunicator::new(
            Arc::clone(&self.llm),
            Arc::clone(&self.bus),
            Arc::clone(&self.metrics),
            &self.config,
        );
        let dispatcher = ToolDispatcher::new(
            Arc::clone(&self.detector),
            Arc::clone(&self.metrics),
            Arc::clone(&self.bus),
            &self.config,
        );
        let prompt_builder = PromptBuilder::new(&self.config);
        let deadline = Instant::now() + self.config.total_timeout;

        // Load or create the state.
        let mut state = match self.store.load(agent_id).await {
            Ok(Some(existing)) => {
                if existing.goal != goal {
                    let error = Error::GoalMismatch {
                        agent_id: agent_id.to_owned(),
                        existing_goal: existing.goal.clone(),
                    };
                    // The loaded state belongs to another goal; leave it
                    // untouched on disk.
                    return self.finish(existing, &error, false).await;
                }
                existing
            }
            Ok(None) => AgentState::new(agent_id, goal).with_additional_messages(additional_messages),
            Err(error) => {
                // Never overwrite a state we could not read.
                return self.finish(AgentState::new(agent_id, goal), &error, false).await;
            }
        };

        info!(agent_id, goal, resumed_turns = state.turns.len(), "run started");
        self.bus.emit(&AgentEvent::RunStarted {
            agent_id: agent_id.to_owned(),
            goal: goal.to_owned(),
        });

        let definitions = tools.definitions();

        loop {
            if cancel.is_cancelled() {
                return self.finish(state, &Error::Cancelled, true).await;
            }
            if Instant::now() >= deadline {
                let error = Error::TotalTimeout {
                    budget_ms: self.config.total_timeout.as_millis() as u64,
                };
                return self.finish(state, &error, true).await;
            }
            if state.turns.len() >= self.config.max_turns {
                let error = Error::MaxTurnsExceeded {
                    turns: state.turns.len(),
                };
                return self.finish(state, &error, true).await;
            }

            let turn_index = state.next_turn_index();
            self.bus.emit(&AgentEvent::StepStarted { turn_index });
            debug!(agent_id, turn_index, "turn started");

            // Optional pre-action deliberation.
            let reasoning_note = match self.deliberate(&mut state, &definitions, &cancel).await {
                Ok(note) => note,
                Err(error) => return self.finish(state, &error, true).await,
            };

            let messages = prompt_builder.build(&state, &definitions, reasoning_note.as_deref());
            let reply = match communicator
                .request_decision(messages, definitions.clone(), turn_index, &cancel)
                .await
            {
                Ok(reply) => reply,
                Err(error) => return self.finish(state, &error, true).await,
            };

            let decision = match reply {
                ModelReply::Invalid {
                    message,
                    raw_excerpt,
                } => {
                    // Observation-level: record the pseudo-turn and let
                    // the model self-correct.
                    warn!(agent_id, turn_index, error = %message, "unusable model reply");
                    state.push_turn(Turn::parse_failure(turn_index, message, raw_excerpt));
                    if let Err(error) = self.persist(&state).await {
                        return self.finish(state, &error, false).await;
                    }
                    self.bus.emit(&AgentEvent::StepCompleted {
                        turn_index,
                        continues: true,
                        executed_tool: None,
                    });
                    continue;
                }
                ModelReply::Decision(decision) => decision,
            };

            self.emit_status(turn_index, &decision);
            let action = decision.action.clone();
            let mut turn = Turn::new(turn_index).with_decision(decision);

            let executed_tool = match action {
                AgentAction::Finish { final_output } => {
                    state.push_turn(turn);
                    if let Err(error) = self.persist(&state).await {
                        return self.finish(state, &error, false).await;
                    }
                    self.bus.emit(&AgentEvent::StepCompleted {
                        turn_index,
                        continues: false,
                        executed_tool: None,
                    });
                    return self.finish_success(state, final_output).await;
                }

                AgentAction::Plan(plan) => {
                    debug!(agent_id, turn_index, plan = %plan, "plan recorded");
                    None
                }

                AgentAction::ToolCall(invocation) => {
                    let call = ToolCall::new(invocation.tool, invocation.params, turn_index);
                    let name = call.tool_name.clone();
                    let result = dispatcher
                        .dispatch_single(tools, agent_id, &call, &cancel)
                        .await;
                    turn.record_single(call, result);
                    Some(name)
                }

                AgentAction::MultiToolCall(invocations) => {
                    let calls: Vec<ToolCall> = invocations
                        .into_iter()
                        .map(|invocation| {
                            ToolCall::new(invocation.tool, invocation.params, turn_index)
                        })
                        .collect();
                    let names = calls
                        .iter()
                        .map(|call| call.tool_name.clone())
                        .collect::<Vec<_>>()
                        .join(",");
                    let results = dispatcher
                        .dispatch_batch(tools, agent_id, &calls, &cancel)
                        .await;
                    turn.record_batch(calls, results);
                    Some(names)
                }

                AgentAction::Retry { call_id } => {
                    let target = call_id
                        .as_deref()
                        .and_then(|id| state.find_tool_call(id))
                        .or_else(|| state.last_tool_call())
                        .cloned();
                    match target {
                        None => {
                            turn.llm_error = Some(LlmFailureNote {
                                error: "retry requested but there is no prior tool call".into(),
                                raw_excerpt: String::new(),
                            });
                            None
                        }
                        Some(prior) => {
                            // A retry is the model re-issuing the same
                            // call; loop detection applies as usual.
                            let call =
                                ToolCall::new(prior.tool_name.clone(), prior.params.clone(), turn_index);
                            let name = call.tool_name.clone();
                            let result = dispatcher
                                .dispatch_single(tools, agent_id, &call, &cancel)
                                .await;
                            turn.record_single(call, result);
                            Some(name)
                        }
                    }
                }
            };

            state.push_turn(turn);
            if let Err(error) = self.persist(&state).await {
                return self.finish(state, &error, false).await;
            }
            self.bus.emit(&AgentEvent::StepCompleted {
                turn_index,
                continues: true,
                executed_tool,
            });
        }
    }

    /// Execute a run in the background and yield its events as a stream.
    ///
    /// The stream ends after the run's `RunCompleted` event; the terminal
    /// outcome is available from that event and from the state store.
    /// Meant for driving a single run per subscriber; events of other
    /// concurrent runs on the same bus are interleaved.
    #[must_use]
    pub fn run_streamed(
        self: Arc<Self>,
        agent_id: String,
        goal: String,
        tools: Arc<ToolRegistry>,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>> {
        let (subscription, mut events) = self.bus.subscribe_channel();
        let bus = Arc::clone(&self.bus);
        let runtime = self;
        tokio::spawn(async move {
            let _ = runtime.run(&agent_id, &goal, &tools, cancel).await;
        });
        Box::pin(async_stream::stream! {
            while let Some(event) = events.recv().await {
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    break;
                }
            }
            bus.unsubscribe(subscription);
        })
    }
}

impl AgentRuntime {
    /// Run the configured reasoning engine, attach its artifacts to the
    /// state, and return the conclusion to inject. A failed pass skips
    /// injection and never blocks the turn.
    async fn deliberate(
        &self,
        state: &mut AgentState,
        definitions: &[crate::tool::ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let Some(engine) = &self.reasoning else {
            return Ok(None);
        };
        let context = prompt::condensed_history(state, REASONING_CONTEXT_TURNS);
        let outcome = match engine
            .reason(&state.goal, &context, definitions, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(error) => {
                warn!(error = %error, "reasoning engine failed; continuing without it");
                return Ok(None);
            }
        };

        self.metrics
            .record_reasoning(outcome.execution_time_ms, outcome.confidence);
        state.current_reasoning_chain = outcome.chain;
        state.current_reasoning_tree = outcome.tree;
        state.reasoning_metadata = outcome.metadata;

        if outcome.success {
            Ok(outcome.conclusion)
        } else {
            debug!(
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "reasoning pass unsuccessful; skipping injection",
            );
            Ok(None)
        }
    }

    fn emit_status(&self, turn_index: usize, decision: &LlmDecision) {
        if !self.config.emit_public_status {
            return;
        }
        let Some(title) = &decision.status.status_title else {
            return;
        };
        self.bus.emit(&AgentEvent::StatusUpdate {
            turn_index,
            status_title: title.clone(),
            status_details: decision.status.status_details.clone(),
            next_step_hint: decision.status.next_step_hint.clone(),
            progress_pct: decision.status.progress_pct,
        });
    }

    async fn persist(&self, state: &AgentState) -> Result<()> {
        self.store.save(state).await
    }

    async fn finish_success(&self, state: AgentState, final_output: String) -> RunResult {
        info!(
            agent_id = %state.agent_id,
            total_turns = state.turns.len(),
            "run completed",
        );
        self.bus.emit(&AgentEvent::RunCompleted {
            agent_id: state.agent_id.clone(),
            succeeded: true,
            total_turns: state.turns.len(),
            error: None,
        });
        RunResult::success(state, final_output)
    }

    /// Terminate with a run-level error. `persist` is false when the
    /// state must not be written back (goal mismatch, unreadable state,
    /// a save that just failed).
    async fn finish(&self, state: AgentState, error: &Error, persist: bool) -> RunResult {
        if persist && let Err(save_error) = self.store.save(&state).await {
            warn!(error = %save_error, "best-effort final persist failed");
        }
        warn!(
            agent_id = %state.agent_id,
            error = %error,
            total_turns = state.turns.len(),
            "run failed",
        );
        self.bus.emit(&AgentEvent::RunCompleted {
            agent_id: state.agent_id.clone(),
            succeeded: false,
            total_turns: state.turns.len(),
            error: Some(error.to_string()),
        });
        RunResult::failure(state, error)
    }
}

impl std::fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntime")
            .field("config", &self.config)
            .field("has_reasoning", &self.reasoning.is_some())
            .finish_non_exhaustive()
    }
}
