//! Hybrid deliberation: a systematic chain pass, then a tree pass seeded
//! with the chain's conclusion.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{ReasoningKind, RuntimeConfig};
use crate::error::Result;
use crate::llm::LlmClient;
use crate::tool::ToolDefinition;

use super::chain::ChainOfThoughtEngine;
use super::tree::TreeOfThoughtsEngine;
use super::{ReasoningEngine, ReasoningOutcome};

/// Chain for structure, tree for exploration.
#[derive(Debug)]
pub struct HybridEngine {
    chain: ChainOfThoughtEngine,
    tree: TreeOfThoughtsEngine,
}

impl HybridEngine {
    /// Create an engine from the runtime configuration.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>, config: &RuntimeConfig) -> Self {
        Self {
            chain: ChainOfThoughtEngine::new(Arc::clone(&llm), config),
            tree: TreeOfThoughtsEngine::new(llm, config),
        }
    }
}

#[async_trait]
impl ReasoningEngine for HybridEngine {
    fn kind(&self) -> ReasoningKind {
        ReasoningKind::Hybrid
    }

    async fn reason(
        &self,
        goal: &str,
        context: &str,
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<ReasoningOutcome> {
        let chain_outcome = self.chain.reason(goal, context, tools, cancel).await?;

        let seeded_context = match chain_outcome.conclusion.as_deref() {
            Some(conclusion) if chain_outcome.success => {
                debug!("seeding tree exploration with chain conclusion");
                format!("{context}\n\nSTRUCTURED ANALYSIS CONCLUSION:\n{conclusion}")
            }
            _ => context.to_owned(),
        };

        let tree_outcome = self
            .tree
            .reason(goal, &seeded_context, tools, cancel)
            .await?;

        let mut metadata = chain_outcome.metadata.clone();
        metadata.extend(tree_outcome.metadata.clone());
        metadata.insert(
            "chain_confidence".into(),
            serde_json::Value::from(chain_outcome.confidence),
        );

        // The tree has the last word; the chain is the fallback when the
        // exploration came up empty.
        let conclusion = tree_outcome
            .conclusion
            .clone()
            .or_else(|| chain_outcome.conclusion.clone());
        let confidence = if tree_outcome.success {
            tree_outcome.confidence
        } else {
            chain_outcome.confidence
        };

        Ok(ReasoningOutcome {
            success: tree_outcome.success || chain_outcome.success,
            conclusion,
            confidence,
            metadata,
            chain: chain_outcome.chain,
            tree: tree_outcome.tree,
            error: tree_outcome.error.or(chain_outcome.error),
            execution_time_ms: chain_outcome.execution_time_ms + tree_outcome.execution_time_ms,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::reasoning::test_support::ScriptedLlm;

    #[tokio::test]
    async fn returns_both_artifacts() {
        let step = r#"{"reasoning": "r", "confidence": 0.8, "insights": []}"#;
        let evaluation_step =
            r#"{"reasoning": "r", "confidence": 0.8, "insights": [], "conclusion": "chain says go"}"#;
        let generate = r#"{"children": [{"thought": "tree says go", "thought_type": "conclusion"}]}"#;
        let llm = ScriptedLlm::new(vec![
            step,
            step,
            step,
            evaluation_step,
            r#"{"score": 0.5, "is_terminal": false}"#, // root eval
            generate,
            r#"{"score": 0.85, "is_terminal": true}"#, // child eval
        ]);

        let config = RuntimeConfig::default();
        let engine = HybridEngine::new(Arc::new(llm), &config);
        let outcome = engine
            .reason("goal", "context", &[], &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.conclusion.as_deref(), Some("tree says go"));
        assert!(outcome.chain.is_some());
        assert!(outcome.tree.is_some());
        assert!((outcome.confidence - 0.85).abs() < 1e-9);
        assert!(outcome.metadata.contains_key("chain_confidence"));
    }

    #[tokio::test]
    async fn chain_conclusion_survives_failed_tree() {
        let step = r#"{"reasoning": "r", "confidence": 0.9, "insights": []}"#;
        let evaluation_step =
            r#"{"reasoning": "r", "confidence": 0.9, "insights": [], "conclusion": "fallback"}"#;
        let llm = ScriptedLlm::new(vec![
            step,
            step,
            step,
            evaluation_step,
            r#"{"score": 0.5, "is_terminal": false}"#, // root eval
            "garbage generation",
        ]);

        let config = RuntimeConfig::default();
        let engine = HybridEngine::new(Arc::new(llm), &config);
        let outcome = engine
            .reason("goal", "context", &[], &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.conclusion.as_deref(), Some("fallback"));
        assert!((outcome.confidence - 0.9).abs() < 1e-9);
        assert!(outcome.error.is_some());
    }
}
