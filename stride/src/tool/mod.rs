//! Tools: the contract, the registry, validation, and dispatch.
//!
//! A tool is a capability the model can invoke. Concrete tools live
//! outside the runtime; they implement [`Tool`] and get registered in a
//! [`ToolRegistry`], which is read-only for the duration of a run. Name
//! lookup is exact and case-sensitive, and the model-facing name never
//! carries provider prefixes.

mod call;
pub mod dispatch;
mod validate;

pub use call::{ToolCall, ToolFailure, ToolFailureKind, ToolResult};
pub use dispatch::ToolDispatcher;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use jsonschema::Validator;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Errors a tool implementation can raise from [`Tool::invoke`].
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ToolError {
    /// The tool failed; the message is surfaced to the model.
    #[error("{0}")]
    Failed(String),

    /// The tool observed cancellation and stopped early.
    #[error("tool invocation was cancelled")]
    Cancelled,
}

impl ToolError {
    /// Create a failure with a message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// The capability contract a tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable identifier, matched verbatim against model output.
    fn name(&self) -> &str;

    /// Human description used in prompt assembly.
    fn description(&self) -> &str;

    /// JSON schema of the parameters, usually generated with
    /// [`schema_for`]. The default accepts any object.
    fn parameters(&self) -> Value {
        json!({"type": "object", "additionalProperties": true})
    }

    /// An authored schema that replaces the generated one. When the
    /// override is not valid JSON Schema the registry falls back to
    /// [`Tool::parameters`] and records a warning.
    fn schema_override(&self) -> Option<Value> {
        None
    }

    /// Execute the tool. May be I/O bound and must honor `cancel`.
    async fn invoke(
        &self,
        params: Value,
        cancel: CancellationToken,
    ) -> Result<Value, ToolError>;
}

/// Generate the JSON schema for a parameter type.
#[must_use]
pub fn schema_for<T: schemars::JsonSchema>() -> Value {
    schemars::schema_for!(T).to_value()
}

/// The model-facing description of one registered tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    /// The tool name.
    pub name: String,
    /// The tool description.
    pub description: String,
    /// The effective parameter schema.
    pub parameters: Value,
}

/// A tool plus its resolved schema and pre-compiled validator.
pub struct RegisteredTool {
    tool: Arc<dyn Tool>,
    definition: ToolDefinition,
    validator: Option<Validator>,
}

impl RegisteredTool {
    /// The underlying tool.
    #[must_use]
    pub fn tool(&self) -> &Arc<dyn Tool> {
        &self.tool
    }

    /// The model-facing definition.
    #[must_use]
    pub const fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    /// Shape-check model-supplied parameters against the effective schema.
    ///
    /// # Errors
    ///
    /// Returns a [`ToolFailure`] of kind
    /// [`ValidationError`](ToolFailureKind::ValidationError) naming the
    /// offending field.
    pub fn validate(&self, params: &Value) -> Result<(), ToolFailure> {
        match &self.validator {
            Some(validator) => validate::check(validator, params),
            // No compilable schema; accept anything.
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("name", &self.definition.name)
            .field("has_validator", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}

/// Name-to-tool registry, read-only during a run.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool of the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// Register a shared tool, replacing any tool of the same name.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_owned();
        let (parameters, validator) = resolve_schema(tool.as_ref());
        let definition = ToolDefinition {
            name: name.clone(),
            description: tool.description().to_owned(),
            parameters,
        };
        if self
            .tools
            .insert(
                name.clone(),
                RegisteredTool {
                    tool,
                    definition,
                    validator,
                },
            )
            .is_some()
        {
            warn!(tool = %name, "replaced a previously registered tool");
        }
    }

    /// Look up a tool by exact, case-sensitive name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// Model-facing definitions, sorted by name for deterministic prompts.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|registered| registered.definition.clone())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` when no tool is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Pick the effective schema: a valid authored override wins, otherwise
/// the generated schema. An override that fails to compile is dropped
/// with a warning, never a hard failure.
fn resolve_schema(tool: &dyn Tool) -> (Value, Option<Validator>) {
    if let Some(override_schema) = tool.schema_override() {
        match jsonschema::validator_for(&override_schema) {
            Ok(validator) => return (override_schema, Some(validator)),
            Err(error) => {
                warn!(
                    tool = tool.name(),
                    error = %error,
                    "schema override is not valid JSON Schema; using generated schema",
                );
            }
        }
    }
    let generated = tool.parameters();
    match jsonschema::validator_for(&generated) {
        Ok(validator) => (generated, Some(validator)),
        Err(error) => {
            warn!(
                tool = tool.name(),
                error = %error,
                "generated schema failed to compile; parameters will not be validated",
            );
            (generated, None)
        }
    }
}
