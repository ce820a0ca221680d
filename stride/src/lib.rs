#![cfg_attr(docsrs, feature(doc_cfg))]
//! Stride is an autonomous agent runtime: it drives a language model
//! through an iterative think-act-observe loop until a user goal is
//! achieved or a budget runs out.
//!
//! The runtime accepts a natural-language goal plus a catalog of tools
//! and repeatedly asks the model what to do next, executes the requested
//! tool calls with validation and loop protection, appends structured
//! observations to a durable turn history, and terminates when the model
//! signals completion.
//!
//! Vendor adapters, concrete tools, and state backends live outside this
//! crate behind the [`llm::LlmClient`], [`tool::Tool`], and
//! [`state::StateStore`] contracts.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stride::prelude::*;
//!
//! let mut tools = ToolRegistry::new();
//! tools.register(MyWeatherTool);
//!
//! let runtime = AgentRuntime::new(Arc::new(my_llm), Arc::new(MemoryStateStore::new()));
//! let result = runtime
//!     .run("agent-1", "Get the weather in Paris", &tools, CancellationToken::new())
//!     .await;
//! println!("{:?}", result.final_output);
//! ```

pub mod agent;
pub mod canonical;
pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod llm;
pub mod loop_detector;
pub mod message;
pub mod metrics;
pub mod prelude;
pub mod prompt;
pub mod reasoning;
pub mod state;
pub mod tool;

pub use agent::{AgentRuntime, RunResult};
pub use config::{ReasoningKind, RuntimeConfig, TreeExplorationStrategy};
pub use error::{Error, ErrorKind, Result, RunError};
pub use event::{AgentEvent, EventBus};
pub use state::{AgentState, Turn};
