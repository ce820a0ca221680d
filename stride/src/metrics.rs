//! Run metrics: counters and timings, exposed as immutable snapshots.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde::Serialize;

use crate::llm::TokenUsage;

/// Accumulates counters and timings across runs.
///
/// Recording is cheap (one short mutex hold); reading happens through
/// [`MetricsCollector::snapshot`], which returns an owned, serializable
/// copy.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    llm_calls: u64,
    llm_failures: u64,
    llm_total_duration_ms: u64,
    tokens_in: u64,
    tokens_out: u64,
    tools: HashMap<String, ToolStats>,
    reasoning_runs: u64,
    reasoning_total_duration_ms: u64,
    reasoning_confidence_sum: f64,
    loop_detections: u64,
    validation_failures: u64,
}

/// Per-tool call statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ToolStats {
    /// Total invocations.
    pub calls: u64,
    /// Failed invocations.
    pub failures: u64,
    /// Sum of invocation durations in milliseconds.
    pub total_duration_ms: u64,
}

impl ToolStats {
    /// Fraction of calls that succeeded, or 1.0 when no call was made.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.calls == 0 {
            1.0
        } else {
            (self.calls - self.failures) as f64 / self.calls as f64
        }
    }
}

impl MetricsCollector {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one model call.
    pub fn record_llm_call(&self, duration_ms: u64, usage: Option<TokenUsage>, ok: bool) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.llm_calls += 1;
        inner.llm_total_duration_ms += duration_ms;
        if !ok {
            inner.llm_failures += 1;
        }
        if let Some(usage) = usage {
            inner.tokens_in += usage.input_tokens;
            inner.tokens_out += usage.output_tokens;
        }
    }

    /// Record one tool invocation.
    pub fn record_tool_call(&self, tool: &str, success: bool, duration_ms: u64) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let stats = inner.tools.entry(tool.to_owned()).or_default();
        stats.calls += 1;
        stats.total_duration_ms += duration_ms;
        if !success {
            stats.failures += 1;
        }
    }

    /// Record one completed reasoning pass.
    pub fn record_reasoning(&self, duration_ms: u64, confidence: f64) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.reasoning_runs += 1;
        inner.reasoning_total_duration_ms += duration_ms;
        inner.reasoning_confidence_sum += confidence;
    }

    /// Record one loop-detected annotation.
    pub fn record_loop_detection(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.loop_detections += 1;
        }
    }

    /// Record one parameter-validation failure.
    pub fn record_validation_failure(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.validation_failures += 1;
        }
    }

    /// Take an immutable snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let Ok(inner) = self.inner.lock() else {
            return MetricsSnapshot::default();
        };
        MetricsSnapshot {
            llm_calls: inner.llm_calls,
            llm_failures: inner.llm_failures,
            llm_total_duration_ms: inner.llm_total_duration_ms,
            tokens_in: inner.tokens_in,
            tokens_out: inner.tokens_out,
            tools: inner
                .tools
                .iter()
                .map(|(name, stats)| (name.clone(), *stats))
                .collect(),
            reasoning_runs: inner.reasoning_runs,
            reasoning_total_duration_ms: inner.reasoning_total_duration_ms,
            mean_reasoning_confidence: if inner.reasoning_runs == 0 {
                0.0
            } else {
                inner.reasoning_confidence_sum / inner.reasoning_runs as f64
            },
            loop_detections: inner.loop_detections,
            validation_failures: inner.validation_failures,
        }
    }
}

/// An immutable, serializable view of the collector.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Total model calls.
    pub llm_calls: u64,
    /// Model calls that produced no usable decision.
    pub llm_failures: u64,
    /// Sum of model call durations in milliseconds.
    pub llm_total_duration_ms: u64,
    /// Prompt tokens, when the provider reports them.
    pub tokens_in: u64,
    /// Completion tokens, when the provider reports them.
    pub tokens_out: u64,
    /// Per-tool statistics, keyed by tool name.
    pub tools: BTreeMap<String, ToolStats>,
    /// Completed reasoning passes.
    pub reasoning_runs: u64,
    /// Sum of reasoning pass durations in milliseconds.
    pub reasoning_total_duration_ms: u64,
    /// Mean final confidence across reasoning passes.
    pub mean_reasoning_confidence: f64,
    /// Loop-detected annotations issued.
    pub loop_detections: u64,
    /// Parameter-validation failures.
    pub validation_failures: u64,
}
