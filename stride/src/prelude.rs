//! Convenience re-exports for the common integration surface.

pub use tokio_util::sync::CancellationToken;

pub use crate::agent::{AgentRuntime, RunResult};
pub use crate::config::{
    ReasoningConfig, ReasoningKind, RetryPolicy, RuntimeConfig, TreeExplorationStrategy,
};
pub use crate::error::{Error, ErrorKind, Result, RunError};
pub use crate::event::{AgentEvent, EventBus, EventSubscriber};
pub use crate::ids::{CallId, NodeId, TurnId};
pub use crate::llm::{
    FunctionCall, LlmChunk, LlmClient, LlmError, LlmReply, LlmRequest, LlmResponse, TokenUsage,
};
pub use crate::message::{ChatMessage, Role};
pub use crate::metrics::MetricsSnapshot;
pub use crate::reasoning::{ReasoningEngine, ReasoningOutcome};
pub use crate::state::{AgentState, FileStateStore, MemoryStateStore, StateStore, Turn};
pub use crate::tool::{
    Tool, ToolCall, ToolDefinition, ToolError, ToolRegistry, ToolResult, schema_for,
};
