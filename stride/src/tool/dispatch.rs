//! Tool dispatch: validation, loop-detector consultation, bounded
//! execution, and output truncation.
//!
//! Multi-tool batches run concurrently and results come back in
//! call-definition order; one failing call never cancels its siblings.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, info_span, warn};

use crate::config::RuntimeConfig;
use crate::event::{AgentEvent, EventBus};
use crate::loop_detector::LoopDetector;
use crate::metrics::MetricsCollector;

use super::call::{ToolCall, ToolFailure, ToolResult};
use super::{RegisteredTool, ToolError, ToolRegistry};

/// Executes tool calls for the scheduler.
#[derive(Debug)]
pub struct ToolDispatcher {
    detector: Arc<LoopDetector>,
    metrics: Arc<MetricsCollector>,
    bus: Arc<EventBus>,
    tool_timeout: std::time::Duration,
    max_output_size: usize,
}

impl ToolDispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(
        detector: Arc<LoopDetector>,
        metrics: Arc<MetricsCollector>,
        bus: Arc<EventBus>,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            detector,
            metrics,
            bus,
            tool_timeout: config.tool_timeout,
            max_output_size: config.max_tool_output_size,
        }
    }

    /// Execute one call and record its outcome.
    pub async fn dispatch_single(
        &self,
        registry: &ToolRegistry,
        agent_id: &str,
        call: &ToolCall,
        cancel: &CancellationToken,
    ) -> ToolResult {
        let span = info_span!(
            "tool",
            tool.name = %call.tool_name,
            tool.id = %call.id,
            tool.success = tracing::field::Empty,
        );
        self.dispatch_inner(registry, agent_id, call, cancel)
            .instrument(span)
            .await
    }

    /// Execute a batch concurrently, preserving input order in the output.
    pub async fn dispatch_batch(
        &self,
        registry: &ToolRegistry,
        agent_id: &str,
        calls: &[ToolCall],
        cancel: &CancellationToken,
    ) -> Vec<ToolResult> {
        let dispatches: Vec<_> = calls
            .iter()
            .map(|call| self.dispatch_single(registry, agent_id, call, cancel))
            .collect();
        futures::future::join_all(dispatches).await
    }

    async fn dispatch_inner(
        &self,
        registry: &ToolRegistry,
        agent_id: &str,
        call: &ToolCall,
        cancel: &CancellationToken,
    ) -> ToolResult {
        let started_utc = Utc::now();
        let started = Instant::now();
        self.bus.emit(&AgentEvent::ToolCallStarted {
            turn_index: call.turn_index,
            tool: call.tool_name.clone(),
        });

        // Pre-execution consult: an already-stuck key still executes, but
        // the eventual observation carries the annotation.
        let stuck_before = self
            .detector
            .is_stuck(agent_id, &call.tool_name, &call.params);

        let outcome = match registry.get(&call.tool_name) {
            None => {
                warn!(tool = %call.tool_name, "tool not found");
                Err(ToolFailure::not_found(&call.tool_name))
            }
            Some(registered) => match registered.validate(&call.params) {
                Err(failure) => {
                    self.metrics.record_validation_failure();
                    warn!(
                        tool = %call.tool_name,
                        field = failure.field.as_deref().unwrap_or("params"),
                        "parameter validation failed",
                    );
                    Err(failure)
                }
                Ok(()) => self.invoke_bounded(registered, call, cancel).await,
            },
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let mut result = match outcome {
            Ok(output) => {
                let mut result = ToolResult::success(call, output, started_utc, duration_ms);
                self.truncate_output(&mut result);
                result
            }
            Err(failure) => ToolResult::failure(call, failure, started_utc, duration_ms),
        };

        self.detector
            .record(agent_id, &call.tool_name, &call.params, result.success);
        let stuck_after = !result.success
            && self
                .detector
                .is_stuck(agent_id, &call.tool_name, &call.params);
        if stuck_before || stuck_after {
            result.loop_detected = true;
            self.metrics.record_loop_detection();
        }

        self.metrics
            .record_tool_call(&call.tool_name, result.success, duration_ms);
        tracing::Span::current().record("tool.success", result.success);
        self.bus.emit(&AgentEvent::ToolCallCompleted {
            turn_index: call.turn_index,
            tool: call.tool_name.clone(),
            success: result.success,
            duration_ms,
            error: result.error.as_ref().map(|e| e.message.clone()),
        });
        result
    }

    async fn invoke_bounded(
        &self,
        registered: &RegisteredTool,
        call: &ToolCall,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolFailure> {
        let invoke = registered
            .tool()
            .invoke(call.params.clone(), cancel.child_token());
        tokio::select! {
            () = cancel.cancelled() => Err(ToolFailure::cancelled()),
            bounded = tokio::time::timeout(self.tool_timeout, invoke) => match bounded {
                Err(_) => Err(ToolFailure::timeout(self.tool_timeout)),
                Ok(Ok(output)) => Ok(output),
                Ok(Err(ToolError::Cancelled)) => Err(ToolFailure::cancelled()),
                Ok(Err(ToolError::Failed(message))) => Err(ToolFailure::exception(message)),
            },
        }
    }

    /// Replace oversized output with a bounded preview record.
    fn truncate_output(&self, result: &mut ToolResult) {
        let serialized = result.output.to_string();
        if serialized.len() <= self.max_output_size {
            return;
        }
        let preview_chars = (self.max_output_size / 8).clamp(64, 1024);
        let preview: String = serialized.chars().take(preview_chars).collect();
        result.output = json!({
            "truncated": true,
            "original_size": serialized.len(),
            "preview": format!("{preview}..."),
        });
        result.truncated = true;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::tool::tests::Weather;
    use crate::tool::{Tool, ToolRegistry};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dispatcher(config: &RuntimeConfig) -> ToolDispatcher {
        ToolDispatcher::new(
            Arc::new(LoopDetector::new(
                config.max_tool_call_history,
                config.consecutive_failure_threshold,
            )),
            Arc::new(MetricsCollector::new()),
            Arc::new(EventBus::new()),
            config,
        )
    }

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn name(&self) -> &str {
            "always_fails"
        }
        fn description(&self) -> &str {
            "fails every time"
        }
        async fn invoke(
            &self,
            _params: Value,
            _cancel: CancellationToken,
        ) -> Result<Value, ToolError> {
            Err(ToolError::failed("deliberate failure"))
        }
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps past the budget"
        }
        async fn invoke(
            &self,
            _params: Value,
            _cancel: CancellationToken,
        ) -> Result<Value, ToolError> {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(Value::Null)
        }
    }

    struct Ordered(AtomicUsize);

    #[async_trait]
    impl Tool for Ordered {
        fn name(&self) -> &str {
            "ordered"
        }
        fn description(&self) -> &str {
            "returns an increasing sequence number"
        }
        async fn invoke(
            &self,
            params: Value,
            _cancel: CancellationToken,
        ) -> Result<Value, ToolError> {
            // Later calls finish first to prove order is restored.
            let slot = params["slot"].as_u64().unwrap_or(0);
            tokio::time::sleep(std::time::Duration::from_millis(30 - 10 * slot)).await;
            let seq = self.0.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"slot": slot, "seq": seq}))
        }
    }

    #[tokio::test]
    async fn successful_dispatch() {
        let config = RuntimeConfig::default();
        let mut registry = ToolRegistry::new();
        registry.register(Weather);
        let dispatcher = dispatcher(&config);

        let call = ToolCall::new("get_weather", json!({"city": "Paris"}), 0);
        let result = dispatcher
            .dispatch_single(&registry, "agent", &call, &CancellationToken::new())
            .await;
        assert!(result.success);
        assert_eq!(result.output["temp_c"], 22);
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn validation_failure_never_reaches_the_tool() {
        let config = RuntimeConfig::default();
        let mut registry = ToolRegistry::new();
        registry.register(Weather);
        let dispatcher = dispatcher(&config);

        let call = ToolCall::new("get_weather", json!({"city": 123}), 0);
        let result = dispatcher
            .dispatch_single(&registry, "agent", &call, &CancellationToken::new())
            .await;
        assert!(!result.success);
        let failure = result.error.unwrap();
        assert_eq!(failure.kind, crate::tool::ToolFailureKind::ValidationError);
        assert_eq!(failure.field.as_deref(), Some("city"));
    }

    #[tokio::test]
    async fn unknown_tool_fails_cleanly() {
        let config = RuntimeConfig::default();
        let registry = ToolRegistry::new();
        let dispatcher = dispatcher(&config);

        let call = ToolCall::new("nope", json!({}), 0);
        let result = dispatcher
            .dispatch_single(&registry, "agent", &call, &CancellationToken::new())
            .await;
        assert!(!result.success);
        assert_eq!(
            result.error.unwrap().kind,
            crate::tool::ToolFailureKind::ToolNotFound
        );
    }

    #[tokio::test]
    async fn timeout_converts_to_failure() {
        let mut config = RuntimeConfig::default();
        config.tool_timeout = std::time::Duration::from_millis(20);
        let mut registry = ToolRegistry::new();
        registry.register(Slow);
        let dispatcher = dispatcher(&config);

        let call = ToolCall::new("slow", json!({}), 0);
        let result = dispatcher
            .dispatch_single(&registry, "agent", &call, &CancellationToken::new())
            .await;
        assert!(!result.success);
        assert_eq!(
            result.error.unwrap().kind,
            crate::tool::ToolFailureKind::Timeout
        );
    }

    #[tokio::test]
    async fn batch_preserves_input_order() {
        let config = RuntimeConfig::default();
        let mut registry = ToolRegistry::new();
        registry.register(Ordered(AtomicUsize::new(0)));
        let dispatcher = dispatcher(&config);

        let calls: Vec<ToolCall> = (0..3)
            .map(|slot| ToolCall::new("ordered", json!({"slot": slot}), 0))
            .collect();
        let results = dispatcher
            .dispatch_batch(&registry, "agent", &calls, &CancellationToken::new())
            .await;

        assert_eq!(results.len(), 3);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.id, calls[i].id);
            assert_eq!(result.output["slot"], i as u64);
        }
    }

    #[tokio::test]
    async fn repeated_failures_set_loop_detected() {
        let config = RuntimeConfig::default();
        let mut registry = ToolRegistry::new();
        registry.register(Failing);
        let dispatcher = dispatcher(&config);
        let cancel = CancellationToken::new();

        let mut flagged = Vec::new();
        for _ in 0..4 {
            let call = ToolCall::new("always_fails", json!({"x": 1}), 0);
            let result = dispatcher
                .dispatch_single(&registry, "agent", &call, &cancel)
                .await;
            flagged.push(result.loop_detected);
        }
        // Third consecutive identical failure reaches the threshold.
        assert_eq!(flagged, vec![false, false, true, true]);
    }

    #[tokio::test]
    async fn oversized_output_is_truncated() {
        let mut config = RuntimeConfig::default();
        config.max_tool_output_size = 128;

        struct Big;

        #[async_trait]
        impl Tool for Big {
            fn name(&self) -> &str {
                "big"
            }
            fn description(&self) -> &str {
                "returns a large payload"
            }
            async fn invoke(
                &self,
                _params: Value,
                _cancel: CancellationToken,
            ) -> Result<Value, ToolError> {
                Ok(json!({"blob": "y".repeat(4096)}))
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(Big);
        let dispatcher = dispatcher(&config);

        let call = ToolCall::new("big", json!({}), 0);
        let result = dispatcher
            .dispatch_single(&registry, "agent", &call, &CancellationToken::new())
            .await;
        assert!(result.success);
        assert!(result.truncated);
        assert_eq!(result.output["truncated"], true);
        assert!(result.output["original_size"].as_u64().unwrap() > 128);
        assert!(result.output["preview"].as_str().unwrap().ends_with("..."));
    }
}
