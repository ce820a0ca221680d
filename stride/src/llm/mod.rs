//! Model communication: the provider contract and the communicator that
//! turns raw provider output into parsed decisions.
//!
//! Concrete vendor adapters live outside this crate; they implement
//! [`LlmClient`] and nothing else. The runtime only depends on:
//!
//! - [`LlmRequest`]: an ordered message list plus an optional function
//!   catalog,
//! - [`LlmResponse`]: either plain text or native function calls,
//! - streaming as a pull sequence of [`LlmChunk`](stream::LlmChunk)s.

mod communicator;
pub mod decision;
pub mod parse;
pub mod stream;

pub use communicator::{LlmCommunicator, ModelReply};
pub use decision::{AgentAction, LlmDecision, PublicStatus, ToolInvocation};
pub use stream::{ChunkAggregator, LlmChunk};

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::message::ChatMessage;
use crate::tool::ToolDefinition;

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Create a usage record.
    #[must_use]
    pub const fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }
}

/// A vendor-agnostic completion request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LlmRequest {
    /// Ordered message list; the framework system message is always first.
    pub messages: Vec<ChatMessage>,
    /// Function catalog, empty when function calling is disabled.
    pub functions: Vec<ToolDefinition>,
    /// Whether the caller will consume the response as a stream.
    pub stream: bool,
}

impl LlmRequest {
    /// Create a text-mode request.
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            functions: Vec::new(),
            stream: false,
        }
    }

    /// Attach a function catalog.
    #[must_use]
    pub fn with_functions(mut self, functions: Vec<ToolDefinition>) -> Self {
        self.functions = functions;
        self
    }
}

/// A native function call returned by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Provider-assigned call id, when present.
    pub id: Option<String>,
    /// The function name as the provider returned it. May carry a
    /// `functions.` prefix; the communicator strips it before lookup.
    pub name: String,
    /// Parsed call arguments.
    pub arguments: Value,
}

impl FunctionCall {
    /// Create a function call.
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
        }
    }
}

/// The content of a completed model response.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmReply {
    /// A text response, to be parsed as a JSON decision.
    Text(String),
    /// One or more native function calls.
    FunctionCalls(Vec<FunctionCall>),
}

/// A completed model response with usage accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    /// The response content.
    pub reply: LlmReply,
    /// Token usage, when the provider reports it.
    pub usage: Option<TokenUsage>,
}

impl LlmResponse {
    /// Create a text response.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            reply: LlmReply::Text(content.into()),
            usage: None,
        }
    }

    /// Create a function-call response.
    #[must_use]
    pub fn function_calls(calls: Vec<FunctionCall>) -> Self {
        Self {
            reply: LlmReply::FunctionCalls(calls),
            usage: None,
        }
    }

    /// Attach usage accounting.
    #[must_use]
    pub const fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Errors a provider adapter can surface.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum LlmError {
    /// Network or transport failure; the communicator retries these.
    #[error("TransportError: {0}")]
    Transport(String),

    /// The provider returned no content at all.
    #[error("the model returned an empty response")]
    Empty,

    /// The request was cancelled.
    #[error("the request was cancelled")]
    Cancelled,
}

/// A pull stream of response chunks with a terminal marker.
pub type LlmStream = Pin<Box<dyn Stream<Item = Result<LlmChunk, LlmError>> + Send>>;

/// The capability contract a vendor adapter implements.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a request and wait for the complete response.
    async fn complete(
        &self,
        request: &LlmRequest,
        cancel: CancellationToken,
    ) -> Result<LlmResponse, LlmError>;

    /// Send a request and stream the response chunk by chunk.
    ///
    /// The default implementation completes the request and replays the
    /// result as a short chunk sequence, so adapters without native
    /// streaming support still satisfy the contract.
    async fn stream(
        &self,
        request: &LlmRequest,
        cancel: CancellationToken,
    ) -> Result<LlmStream, LlmError> {
        let response = self.complete(request, cancel).await?;
        Ok(stream::replay(response))
    }

    /// Whether [`LlmClient::stream`] delivers chunks incrementally.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Whether the provider can return native function calls.
    fn supports_function_calling(&self) -> bool {
        false
    }
}
