//! Streaming chunks and their aggregation into complete responses.

use std::collections::BTreeMap;

use serde_json::Value;

use super::{FunctionCall, LlmError, LlmReply, LlmResponse, LlmStream, TokenUsage};

/// One chunk of a streamed model response.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum LlmChunk {
    /// Incremental text content.
    Text(String),

    /// A native function call began.
    FunctionCallStart {
        /// Position of this call in the response.
        index: usize,
        /// Provider-assigned call id, when present.
        id: Option<String>,
        /// The function name.
        name: String,
    },

    /// Partial JSON arguments for an in-progress function call.
    FunctionCallDelta {
        /// Position of the call being extended.
        index: usize,
        /// Partial argument JSON.
        partial_json: String,
    },

    /// Token usage accounting.
    Usage(TokenUsage),

    /// The stream ended.
    Done,
}

impl LlmChunk {
    /// Create a text chunk.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }

    /// The text content, if this is a text chunk.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns `true` for the terminal marker.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Rebuilds a complete [`LlmResponse`] from a chunk sequence.
#[derive(Debug, Default)]
pub struct ChunkAggregator {
    text: String,
    calls: BTreeMap<usize, PartialCall>,
    usage: Option<TokenUsage>,
}

impl ChunkAggregator {
    /// Create an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one chunk into the accumulated state.
    pub fn apply(&mut self, chunk: &LlmChunk) {
        match chunk {
            LlmChunk::Text(delta) => self.text.push_str(delta),
            LlmChunk::FunctionCallStart { index, id, name } => {
                self.calls.insert(
                    *index,
                    PartialCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: String::new(),
                    },
                );
            }
            LlmChunk::FunctionCallDelta {
                index,
                partial_json,
            } => {
                if let Some(call) = self.calls.get_mut(index) {
                    call.arguments.push_str(partial_json);
                }
            }
            LlmChunk::Usage(usage) => self.usage = Some(*usage),
            LlmChunk::Done => {}
        }
    }

    /// The accumulated text so far.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Assemble the final response.
    ///
    /// Function calls win over text when both are present. Call arguments
    /// that fail to parse as JSON are preserved as raw strings so that
    /// parameter validation can report them.
    pub fn into_response(self) -> Result<LlmResponse, LlmError> {
        if !self.calls.is_empty() {
            let calls = self
                .calls
                .into_values()
                .map(|call| FunctionCall {
                    id: call.id,
                    name: call.name,
                    arguments: parse_arguments(&call.arguments),
                })
                .collect();
            let mut response = LlmResponse::function_calls(calls);
            response.usage = self.usage;
            return Ok(response);
        }
        if self.text.is_empty() {
            return Err(LlmError::Empty);
        }
        let mut response = LlmResponse::text(self.text);
        response.usage = self.usage;
        Ok(response)
    }
}

fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

/// Replay a completed response as a chunk sequence. Used by the default
/// [`LlmClient::stream`](super::LlmClient::stream) implementation.
#[must_use]
pub(crate) fn replay(response: LlmResponse) -> LlmStream {
    let mut chunks = Vec::new();
    match response.reply {
        LlmReply::Text(text) => {
            if !text.is_empty() {
                chunks.push(LlmChunk::Text(text));
            }
        }
        LlmReply::FunctionCalls(calls) => {
            for (index, call) in calls.into_iter().enumerate() {
                chunks.push(LlmChunk::FunctionCallStart {
                    index,
                    id: call.id,
                    name: call.name,
                });
                chunks.push(LlmChunk::FunctionCallDelta {
                    index,
                    partial_json: call.arguments.to_string(),
                });
            }
        }
    }
    if let Some(usage) = response.usage {
        chunks.push(LlmChunk::Usage(usage));
    }
    chunks.push(LlmChunk::Done);
    Box::pin(futures::stream::iter(chunks.into_iter().map(Ok)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::StreamExt as _;
    use serde_json::json;

    #[test]
    fn text_accumulates() {
        let mut agg = ChunkAggregator::new();
        agg.apply(&LlmChunk::text("Hello"));
        agg.apply(&LlmChunk::text(" world"));
        agg.apply(&LlmChunk::Done);
        assert_eq!(agg.text(), "Hello world");
        let response = agg.into_response().unwrap();
        assert_eq!(response.reply, LlmReply::Text("Hello world".into()));
    }

    #[test]
    fn function_call_arguments_assemble_across_deltas() {
        let mut agg = ChunkAggregator::new();
        agg.apply(&LlmChunk::FunctionCallStart {
            index: 0,
            id: Some("call_1".into()),
            name: "get_weather".into(),
        });
        agg.apply(&LlmChunk::FunctionCallDelta {
            index: 0,
            partial_json: r#"{"city":"#.into(),
        });
        agg.apply(&LlmChunk::FunctionCallDelta {
            index: 0,
            partial_json: r#""Paris"}"#.into(),
        });
        agg.apply(&LlmChunk::Done);

        let response = agg.into_response().unwrap();
        let LlmReply::FunctionCalls(calls) = response.reply else {
            panic!("expected function calls");
        };
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_weather");
        assert_eq!(calls[0].arguments, json!({"city": "Paris"}));
    }

    #[test]
    fn multiple_calls_preserve_index_order() {
        let mut agg = ChunkAggregator::new();
        // Deliberately start index 1 before index 0.
        agg.apply(&LlmChunk::FunctionCallStart {
            index: 1,
            id: None,
            name: "b".into(),
        });
        agg.apply(&LlmChunk::FunctionCallStart {
            index: 0,
            id: None,
            name: "a".into(),
        });
        let response = agg.into_response().unwrap();
        let LlmReply::FunctionCalls(calls) = response.reply else {
            panic!("expected function calls");
        };
        assert_eq!(calls[0].name, "a");
        assert_eq!(calls[1].name, "b");
    }

    #[test]
    fn unparseable_arguments_are_kept_as_raw_string() {
        let mut agg = ChunkAggregator::new();
        agg.apply(&LlmChunk::FunctionCallStart {
            index: 0,
            id: None,
            name: "t".into(),
        });
        agg.apply(&LlmChunk::FunctionCallDelta {
            index: 0,
            partial_json: "{broken".into(),
        });
        let response = agg.into_response().unwrap();
        let LlmReply::FunctionCalls(calls) = response.reply else {
            panic!("expected function calls");
        };
        assert_eq!(calls[0].arguments, Value::String("{broken".into()));
    }

    #[test]
    fn empty_stream_is_an_error() {
        let agg = ChunkAggregator::new();
        assert!(matches!(agg.into_response(), Err(LlmError::Empty)));
    }

    #[test]
    fn usage_is_carried() {
        let mut agg = ChunkAggregator::new();
        agg.apply(&LlmChunk::text("x"));
        agg.apply(&LlmChunk::Usage(TokenUsage::new(10, 2)));
        let response = agg.into_response().unwrap();
        assert_eq!(response.usage, Some(TokenUsage::new(10, 2)));
    }

    #[tokio::test]
    async fn replay_roundtrips_through_aggregator() {
        let original = LlmResponse::text("final answer").with_usage(TokenUsage::new(5, 1));
        let mut stream = replay(original.clone());
        let mut agg = ChunkAggregator::new();
        while let Some(chunk) = stream.next().await {
            agg.apply(&chunk.unwrap());
        }
        assert_eq!(agg.into_response().unwrap(), original);
    }
}
