//! Runtime configuration.
//!
//! All behavior of the runtime is driven by explicit configuration passed
//! into [`AgentRuntime`](crate::agent::AgentRuntime); there is no ambient
//! state. Every option has a default.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for an agent run.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Hard cap on the number of turns per run (default: 20).
    pub max_turns: usize,
    /// How many recent turns are rendered in full detail in the prompt
    /// (default: 5). Older turns become one-line summaries.
    pub max_recent_turns: usize,
    /// Whether older turns are summarized at all. When `false`, every turn
    /// is rendered in full detail (default: true).
    pub enable_history_summarization: bool,
    /// Serialized tool output larger than this many bytes is truncated
    /// before being recorded and shown to the model (default: 16 KiB).
    pub max_tool_output_size: usize,
    /// How many recent tool calls the loop detector remembers per agent
    /// (default: 50).
    pub max_tool_call_history: usize,
    /// How many consecutive identical failures trigger a loop-detected
    /// annotation (default: 3). Zero disables detection.
    pub consecutive_failure_threshold: usize,
    /// Whether the tool catalog is sent as a native function catalog when
    /// the provider supports it (default: true).
    pub use_function_calling: bool,
    /// Whether status fields from decisions are emitted as
    /// [`StatusUpdate`](crate::event::AgentEvent::StatusUpdate) events and
    /// the status rules are included in the prompt (default: true).
    pub emit_public_status: bool,
    /// Whether to stream model responses when the provider supports it
    /// (default: true).
    pub enable_streaming: bool,
    /// Budget per model request (default: 60s).
    pub llm_timeout: Duration,
    /// Budget per tool invocation (default: 30s).
    pub tool_timeout: Duration,
    /// Budget for the whole run (default: 10min).
    pub total_timeout: Duration,
    /// Retry policy for transient model transport errors.
    pub retry: RetryPolicy,
    /// Pre-action deliberation configuration.
    pub reasoning: ReasoningConfig,
}

impl RuntimeConfig {
    /// Default turn budget.
    pub const DEFAULT_MAX_TURNS: usize = 20;
    /// Default full-detail history window.
    pub const DEFAULT_MAX_RECENT_TURNS: usize = 5;
    /// Default tool output truncation threshold in bytes.
    pub const DEFAULT_MAX_TOOL_OUTPUT_SIZE: usize = 16 * 1024;
    /// Default loop-detector history depth.
    pub const DEFAULT_MAX_TOOL_CALL_HISTORY: usize = 50;
    /// Default consecutive-failure threshold.
    pub const DEFAULT_FAILURE_THRESHOLD: usize = 3;

    /// Create a config with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_turns: Self::DEFAULT_MAX_TURNS,
            max_recent_turns: Self::DEFAULT_MAX_RECENT_TURNS,
            enable_history_summarization: true,
            max_tool_output_size: Self::DEFAULT_MAX_TOOL_OUTPUT_SIZE,
            max_tool_call_history: Self::DEFAULT_MAX_TOOL_CALL_HISTORY,
            consecutive_failure_threshold: Self::DEFAULT_FAILURE_THRESHOLD,
            use_function_calling: true,
            emit_public_status: true,
            enable_streaming: true,
            llm_timeout: Duration::from_secs(60),
            tool_timeout: Duration::from_secs(30),
            total_timeout: Duration::from_secs(600),
            retry: RetryPolicy::new(),
            reasoning: ReasoningConfig::new(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponential backoff policy applied to retryable model transport errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt (default: 3).
    pub max_retries: usize,
    /// Delay before the first retry (default: 500ms).
    pub base_delay: Duration,
    /// Multiplier applied per retry (default: 2.0).
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Create a policy with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        }
    }

    /// The deterministic backoff delay before retry `attempt` (0-based).
    /// Jitter is added by the caller.
    #[must_use]
    pub fn backoff(&self, attempt: usize) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt as i32);
        self.base_delay.mul_f64(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Which deliberation engine runs before each action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ReasoningKind {
    /// No pre-action deliberation.
    #[default]
    None,
    /// Linear four-step chain: analysis, planning, decision, evaluation.
    ChainOfThought,
    /// Bounded tree exploration with a pluggable frontier strategy.
    TreeOfThoughts,
    /// Chain first, then a tree seeded with the chain's conclusion.
    Hybrid,
}

/// How the tree engine picks the next frontier node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TreeExplorationStrategy {
    /// Highest-scoring node first; ties break by insertion order.
    #[default]
    BestFirst,
    /// First-in, first-out.
    BreadthFirst,
    /// Last-in, first-out.
    DepthFirst,
    /// Breadth-first, keeping only the best `beam_width` children per
    /// expansion.
    BeamSearch,
}

/// Configuration of the reasoning engines.
#[derive(Debug, Clone, Copy)]
pub struct ReasoningConfig {
    /// Which engine runs (default: [`ReasoningKind::None`]).
    pub kind: ReasoningKind,
    /// Cap on chain sub-steps, at most the four canonical ones
    /// (default: 4).
    pub max_reasoning_steps: usize,
    /// Maximum tree depth (default: 3).
    pub max_tree_depth: usize,
    /// Maximum number of tree nodes (default: 20).
    pub max_tree_nodes: usize,
    /// Frontier strategy for the tree engine.
    pub tree_exploration_strategy: TreeExplorationStrategy,
    /// Beam width for [`TreeExplorationStrategy::BeamSearch`]
    /// (default: 3).
    pub beam_width: usize,
    /// Whether a fifth validator call rates the chain result
    /// (default: false).
    pub enable_reasoning_validation: bool,
    /// Confidence floor used together with validation (default: 0.6).
    pub min_reasoning_confidence: f64,
}

impl ReasoningConfig {
    /// Create a config with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            kind: ReasoningKind::None,
            max_reasoning_steps: 4,
            max_tree_depth: 3,
            max_tree_nodes: 20,
            tree_exploration_strategy: TreeExplorationStrategy::BestFirst,
            beam_width: 3,
            enable_reasoning_validation: false,
            min_reasoning_confidence: 0.6,
        }
    }

    /// Shorthand for enabling an engine kind on an otherwise-default
    /// config.
    #[must_use]
    pub const fn with_kind(kind: ReasoningKind) -> Self {
        let mut config = Self::new();
        config.kind = kind;
        config
    }
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_turns, 20);
        assert_eq!(config.max_recent_turns, 5);
        assert!(config.enable_history_summarization);
        assert_eq!(config.consecutive_failure_threshold, 3);
        assert_eq!(config.reasoning.kind, ReasoningKind::None);
    }

    #[test]
    fn backoff_grows_exponentially() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
    }

    #[test]
    fn backoff_never_shrinks() {
        let policy = RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(100),
            backoff_multiplier: 0.5,
        };
        assert_eq!(policy.backoff(3), Duration::from_millis(100));
    }

    #[test]
    fn reasoning_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ReasoningKind::TreeOfThoughts).unwrap();
        assert_eq!(json, r#""tree_of_thoughts""#);
    }
}
