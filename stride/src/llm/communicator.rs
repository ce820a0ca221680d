//! The communicator drives one model request end to end: build the
//! request, stream or await the response, retry transient transport
//! failures, and map the raw reply to a typed decision.
//!
//! Parse and schema failures are **not** errors here: they come back as
//! [`ModelReply::Invalid`] so the scheduler can turn them into a
//! self-correcting observation and keep looping.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt as _;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{RetryPolicy, RuntimeConfig};
use crate::error::{Error, Result};
use crate::event::{AgentEvent, EventBus};
use crate::message::ChatMessage;
use crate::metrics::MetricsCollector;
use crate::tool::ToolDefinition;

use super::decision::{AgentAction, LlmDecision, ToolInvocation};
use super::stream::ChunkAggregator;
use super::{FunctionCall, LlmClient, LlmError, LlmReply, LlmRequest, LlmResponse, parse};

/// Provider-specific prefix stripped from function names before lookup.
const FUNCTION_NAME_PREFIX: &str = "functions.";

/// The outcome of one model request, as seen by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    /// A usable decision.
    Decision(LlmDecision),
    /// The response could not be mapped to a decision. Observation-level:
    /// the scheduler appends a pseudo-turn and continues.
    Invalid {
        /// Why the response was unusable.
        message: String,
        /// A bounded excerpt of the raw output.
        raw_excerpt: String,
    },
}

/// Drives model requests for the scheduler and the reasoning engines.
pub struct LlmCommunicator {
    client: Arc<dyn LlmClient>,
    bus: Arc<EventBus>,
    metrics: Arc<MetricsCollector>,
    llm_timeout: std::time::Duration,
    retry: RetryPolicy,
    use_function_calling: bool,
    enable_streaming: bool,
}

impl LlmCommunicator {
    /// Create a communicator over a provider adapter.
    #[must_use]
    pub fn new(
        client: Arc<dyn LlmClient>,
        bus: Arc<EventBus>,
        metrics: Arc<MetricsCollector>,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            client,
            bus,
            metrics,
            llm_timeout: config.llm_timeout,
            retry: config.retry,
            use_function_calling: config.use_function_calling,
            enable_streaming: config.enable_streaming,
        }
    }

    /// Ask the model for the next decision.
    ///
    /// # Errors
    ///
    /// Returns run-level errors only: exhausted transport retries,
    /// per-request timeout, or cancellation. Parse and schema failures are
    /// reported through [`ModelReply::Invalid`].
    pub async fn request_decision(
        &self,
        messages: Vec<ChatMessage>,
        functions: Vec<ToolDefinition>,
        turn_index: usize,
        cancel: &CancellationToken,
    ) -> Result<ModelReply> {
        let function_calling = self.use_function_calling && self.client.supports_function_calling();
        let streaming = self.enable_streaming && self.client.supports_streaming();
        let request = LlmRequest {
            messages,
            functions: if function_calling {
                functions
            } else {
                Vec::new()
            },
            stream: streaming,
        };

        self.bus.emit(&AgentEvent::LlmCallStarted { turn_index });
        let started = Instant::now();

        let mut attempt = 0usize;
        let outcome = loop {
            let result = if streaming {
                self.attempt_streaming(&request, cancel).await
            } else {
                self.attempt_blocking(&request, cancel).await
            };
            match result {
                Ok(response) => break Ok(response),
                Err(error @ Error::LlmTransport { .. }) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = jittered(self.retry.backoff(attempt - 1));
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient model transport error; retrying",
                    );
                    tokio::select! {
                        () = cancel.cancelled() => break Err(Error::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(error) => break Err(error),
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(response) => {
                self.metrics
                    .record_llm_call(duration_ms, response.usage, true);
                let reply = normalize(response);
                let (ok, error) = match &reply {
                    ModelReply::Decision(_) => (true, None),
                    ModelReply::Invalid { message, .. } => (false, Some(message.clone())),
                };
                self.bus.emit(&AgentEvent::LlmCallCompleted {
                    turn_index,
                    ok,
                    error,
                });
                Ok(reply)
            }
            Err(Error::LlmEmptyResponse) => {
                self.metrics.record_llm_call(duration_ms, None, false);
                self.bus.emit(&AgentEvent::LlmCallCompleted {
                    turn_index,
                    ok: false,
                    error: Some("empty response".into()),
                });
                // Observation-level: tell the model its reply was empty.
                Ok(ModelReply::Invalid {
                    message: "the model returned an empty response".into(),
                    raw_excerpt: String::new(),
                })
            }
            Err(error) => {
                self.metrics.record_llm_call(duration_ms, None, false);
                self.bus.emit(&AgentEvent::LlmCallCompleted {
                    turn_index,
                    ok: false,
                    error: Some(error.to_string()),
                });
                Err(error)
            }
        }
    }

    async fn attempt_blocking(
        &self,
        request: &LlmRequest,
        cancel: &CancellationToken,
    ) -> Result<LlmResponse> {
        let call = self.client.complete(request, cancel.child_token());
        match tokio::time::timeout(self.llm_timeout, call).await {
            Err(_) => Err(Error::LlmTimeout {
                budget_ms: self.llm_timeout.as_millis() as u64,
            }),
            Ok(result) => result.map_err(map_llm_error),
        }
    }

    async fn attempt_streaming(
        &self,
        request: &LlmRequest,
        cancel: &CancellationToken,
    ) -> Result<LlmResponse> {
        let consume = async {
            let mut stream = self.client.stream(request, cancel.child_token()).await?;
            let mut aggregator = ChunkAggregator::new();
            while let Some(item) = stream.next().await {
                let chunk = item?;
                if let Some(text) = chunk.as_text()
                    && !text.is_empty()
                {
                    self.bus.emit(&AgentEvent::LlmChunkReceived {
                        chunk: text.to_owned(),
                    });
                }
                let done = chunk.is_done();
                aggregator.apply(&chunk);
                if done {
                    break;
                }
            }
            debug!(chars = aggregator.text().len(), "model stream drained");
            aggregator.into_response()
        };

        let bounded = async {
            tokio::select! {
                // Abort at the next chunk boundary when cancelled.
                () = cancel.cancelled() => Err(LlmError::Cancelled),
                result = consume => result,
            }
        };

        match tokio::time::timeout(self.llm_timeout, bounded).await {
            Err(_) => Err(Error::LlmTimeout {
                budget_ms: self.llm_timeout.as_millis() as u64,
            }),
            Ok(result) => result.map_err(map_llm_error),
        }
    }
}

impl std::fmt::Debug for LlmCommunicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmCommunicator")
            .field("llm_timeout", &self.llm_timeout)
            .field("use_function_calling", &self.use_function_calling)
            .field("enable_streaming", &self.enable_streaming)
            .finish_non_exhaustive()
    }
}

fn map_llm_error(error: LlmError) -> Error {
    match error {
        LlmError::Transport(message) => Error::LlmTransport { message },
        LlmError::Empty => Error::LlmEmptyResponse,
        LlmError::Cancelled => Error::Cancelled,
    }
}

fn jittered(delay: std::time::Duration) -> std::time::Duration {
    delay.mul_f64(1.0 + fastrand::f64() * 0.25)
}

/// Map a completed response to a [`ModelReply`].
fn normalize(response: LlmResponse) -> ModelReply {
    match response.reply {
        LlmReply::FunctionCalls(calls) if !calls.is_empty() => {
            let mut invocations: Vec<ToolInvocation> =
                calls.into_iter().map(normalize_function_call).collect();
            let action = if invocations.len() == 1 {
                AgentAction::ToolCall(invocations.remove(0))
            } else {
                AgentAction::MultiToolCall(invocations)
            };
            ModelReply::Decision(LlmDecision::new(action))
        }
        LlmReply::FunctionCalls(_) => ModelReply::Invalid {
            message: "the model returned an empty function-call list".into(),
            raw_excerpt: String::new(),
        },
        LlmReply::Text(text) => normalize_text(&text),
    }
}

fn normalize_text(text: &str) -> ModelReply {
    let Some(candidate) = parse::extract_json_candidate(text) else {
        return ModelReply::Invalid {
            message: "invalid JSON".into(),
            raw_excerpt: parse::excerpt(text),
        };
    };
    let Some(value) = parse::parse_lenient(candidate) else {
        return ModelReply::Invalid {
            message: "invalid JSON".into(),
            raw_excerpt: parse::excerpt(text),
        };
    };
    match LlmDecision::from_value(&value) {
        Ok(decision) => ModelReply::Decision(decision),
        Err(error) => ModelReply::Invalid {
            message: error.to_string(),
            raw_excerpt: parse::excerpt(text),
        },
    }
}

fn normalize_function_call(call: FunctionCall) -> ToolInvocation {
    let name = call
        .name
        .strip_prefix(FUNCTION_NAME_PREFIX)
        .unwrap_or(&call.name)
        .to_owned();
    // String-typed arguments usually mean the provider handed the raw
    // argument JSON through unparsed.
    let params = match call.arguments {
        serde_json::Value::String(raw) => {
            parse::parse_lenient(&raw).unwrap_or(serde_json::Value::String(raw))
        }
        other => other,
    };
    ToolInvocation::new(name, params)
}
