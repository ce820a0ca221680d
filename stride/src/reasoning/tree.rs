//! Tree-of-thoughts: bounded exploration with pluggable frontier
//! strategies.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ordered_float::OrderedFloat;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{ReasoningKind, RuntimeConfig, TreeExplorationStrategy};
use crate::error::Result;
use crate::ids::NodeId;
use crate::llm::LlmClient;
use crate::tool::ToolDefinition;

use super::artifacts::{NodeState, ReasoningTree, ThoughtType};
use super::{ReasoningEngine, ReasoningOutcome, StepReply, complete_json, render_tools};

const GENERATE_PROMPT: &str = "You are exploring solution candidates for a goal.\n\
GOAL: {goal}\n\nCONTEXT:\n{context}\n\nAVAILABLE TOOLS:\n{tools}\n\n\
CURRENT LINE OF THOUGHT:\n{path}\n\n\
Propose up to {fanout} distinct next thoughts continuing this line. Use \
thought_type \"conclusion\" only for a candidate final answer. Reply with \
a single JSON object:\n\
{\"children\": [{\"thought\": \"...\", \"thought_type\": \"hypothesis\", \"estimated_score\": 0.0}]}";

const EVALUATE_PROMPT: &str = "You are scoring one candidate thought.\n\
GOAL: {goal}\n\nLINE OF THOUGHT:\n{path}\n\nCANDIDATE:\n{thought}\n\n\
Score how promising the candidate is for achieving the goal, between 0 \
and 1. Set is_terminal to true only when the candidate is an acceptable \
final answer on its own. Reply with a single JSON object:\n\
{\"score\": 0.0, \"is_terminal\": false, \"reasoning\": \"...\"}";

/// Default number of children generated per expansion for the non-beam
/// strategies.
const DEFAULT_FANOUT: usize = 3;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct BestEntry {
    score: OrderedFloat<f64>,
    // Later insertions lose score ties, keeping selection stable.
    seq: Reverse<u64>,
    id: NodeId,
}

/// The frontier of nodes eligible for expansion.
#[derive(Debug)]
enum Frontier {
    Best(BinaryHeap<BestEntry>),
    Breadth(VecDeque<NodeId>),
    Depth(Vec<NodeId>),
}

impl Frontier {
    fn new(strategy: TreeExplorationStrategy) -> Self {
        match strategy {
            TreeExplorationStrategy::BestFirst => Self::Best(BinaryHeap::new()),
            TreeExplorationStrategy::BreadthFirst | TreeExplorationStrategy::BeamSearch => {
                Self::Breadth(VecDeque::new())
            }
            TreeExplorationStrategy::DepthFirst => Self::Depth(Vec::new()),
        }
    }

    fn push(&mut self, id: NodeId, score: f64, seq: u64) {
        match self {
            Self::Best(heap) => heap.push(BestEntry {
                score: OrderedFloat(score),
                seq: Reverse(seq),
                id,
            }),
            Self::Breadth(queue) => queue.push_back(id),
            Self::Depth(stack) => stack.push(id),
        }
    }

    fn pop(&mut self) -> Option<NodeId> {
        match self {
            Self::Best(heap) => heap.pop().map(|entry| entry.id),
            Self::Breadth(queue) => queue.pop_front(),
            Self::Depth(stack) => stack.pop(),
        }
    }
}

/// The bounded tree exploration engine.
pub struct TreeOfThoughtsEngine {
    llm: Arc<dyn LlmClient>,
    llm_timeout: Duration,
    max_depth: usize,
    max_nodes: usize,
    strategy: TreeExplorationStrategy,
    beam_width: usize,
}

impl TreeOfThoughtsEngine {
    /// Create an engine from the runtime configuration.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>, config: &RuntimeConfig) -> Self {
        Self {
            llm,
            llm_timeout: config.llm_timeout,
            max_depth: config.reasoning.max_tree_depth,
            max_nodes: config.reasoning.max_tree_nodes,
            strategy: config.reasoning.tree_exploration_strategy,
            beam_width: config.reasoning.beam_width.max(1),
        }
    }

    const fn fanout(&self) -> usize {
        match self.strategy {
            TreeExplorationStrategy::BeamSearch => self.beam_width,
            _ => DEFAULT_FANOUT,
        }
    }
}

impl std::fmt::Debug for TreeOfThoughtsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeOfThoughtsEngine")
            .field("max_depth", &self.max_depth)
            .field("max_nodes", &self.max_nodes)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ReasoningEngine for TreeOfThoughtsEngine {
    fn kind(&self) -> ReasoningKind {
        ReasoningKind::TreeOfThoughts
    }

    async fn reason(
        &self,
        goal: &str,
        context: &str,
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<ReasoningOutcome> {
        let started = Instant::now();
        let mut tree = ReasoningTree::new(goal, self.max_depth, self.max_nodes, self.strategy);
        let root = tree.add_root(format!("Achieve the goal: {goal}"), ThoughtType::Hypothesis);

        // The root is evaluated like any other node so the frontier is
        // uniformly scored.
        let (score, terminal) = match self.evaluate(goal, &tree, &root, cancel).await? {
            Ok(evaluation) => evaluation,
            Err(reason) => return Ok(aborted(tree, reason, started)),
        };
        tree.set_evaluation(&root, score, terminal);

        let mut frontier = Frontier::new(self.strategy);
        let mut seq = 0u64;
        let mut terminal_found = terminal;
        frontier.push(root, score, seq);

        while !terminal_found && !tree.at_node_cap() && !tree.at_depth_cap() {
            let Some(current) = frontier.pop() else {
                break;
            };
            let Some(node) = tree.node(&current) else {
                continue;
            };
            if node.state == NodeState::Pruned || node.depth + 1 > self.max_depth {
                continue;
            }

            let candidates = match self.generate(goal, context, tools, &tree, &current, cancel).await? {
                Ok(candidates) => candidates,
                Err(reason) => return Ok(aborted(tree, reason, started)),
            };

            let mut children = Vec::new();
            for (thought, thought_type) in candidates.into_iter().take(self.fanout()) {
                match tree.add_child(&current, thought, thought_type) {
                    Some(child) => children.push(child),
                    None => break,
                }
            }
            debug!(
                parent = %current,
                children = children.len(),
                nodes = tree.node_count,
                "expanded tree node",
            );

            for child in children {
                let (score, terminal) = match self.evaluate(goal, &tree, &child, cancel).await? {
                    Ok(evaluation) => evaluation,
                    Err(reason) => return Ok(aborted(tree, reason, started)),
                };
                tree.set_evaluation(&child, score, terminal);
                if terminal {
                    terminal_found = true;
                } else {
                    seq += 1;
                    frontier.push(child, score, seq);
                }
            }
            tree.mark_expanded(&current);
        }

        tree.compute_best_path();
        let conclusion = tree.best_conclusion().map(str::to_owned);
        let confidence = tree
            .best_path
            .last()
            .and_then(|id| tree.node(id))
            .and_then(|node| node.score)
            .unwrap_or(0.0);

        let mut metadata = serde_json::Map::new();
        metadata.insert("node_count".into(), Value::from(tree.node_count));
        metadata.insert("max_depth_reached".into(), Value::from(tree.current_max_depth));
        metadata.insert(
            "strategy".into(),
            serde_json::to_value(tree.exploration_strategy).unwrap_or(Value::Null),
        );

        Ok(ReasoningOutcome {
            success: conclusion.is_some(),
            conclusion,
            confidence,
            metadata,
            chain: None,
            tree: Some(tree),
            error: None,
            execution_time_ms: started.elapsed().as_millis() as u64,
        })
    }
}

impl TreeOfThoughtsEngine {
    async fn generate(
        &self,
        goal: &str,
        context: &str,
        tools: &[ToolDefinition],
        tree: &ReasoningTree,
        parent: &NodeId,
        cancel: &CancellationToken,
    ) -> Result<std::result::Result<Vec<(String, ThoughtType)>, String>> {
        let prompt = GENERATE_PROMPT
            .replace("{goal}", goal)
            .replace("{context}", context)
            .replace("{tools}", &render_tools(tools))
            .replace("{path}", &render_path(tree, parent))
            .replace("{fanout}", &self.fanout().to_string());
        match complete_json(&self.llm, prompt, self.llm_timeout, cancel).await? {
            StepReply::Value(value) => Ok(Ok(parse_candidates(&value))),
            StepReply::Unusable(reason) => Ok(Err(reason)),
        }
    }

    async fn evaluate(
        &self,
        goal: &str,
        tree: &ReasoningTree,
        node_id: &NodeId,
        cancel: &CancellationToken,
    ) -> Result<std::result::Result<(f64, bool), String>> {
        let thought = tree
            .node(node_id)
            .map(|node| node.thought.clone())
            .unwrap_or_default();
        let prompt = EVALUATE_PROMPT
            .replace("{goal}", goal)
            .replace("{path}", &render_path(tree, node_id))
            .replace("{thought}", &thought);
        match complete_json(&self.llm, prompt, self.llm_timeout, cancel).await? {
            StepReply::Value(value) => {
                let score = value
                    .get("score")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.5)
                    .clamp(0.0, 1.0);
                let terminal = value
                    .get("is_terminal")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Ok(Ok((score, terminal)))
            }
            StepReply::Unusable(reason) => Ok(Err(reason)),
        }
    }
}

fn aborted(mut tree: ReasoningTree, reason: String, started: Instant) -> ReasoningOutcome {
    warn!(reason = %reason, "tree exploration aborted");
    tree.compute_best_path();
    ReasoningOutcome {
        success: false,
        conclusion: None,
        confidence: 0.0,
        metadata: serde_json::Map::new(),
        chain: None,
        tree: Some(tree),
        error: Some(reason),
        execution_time_ms: started.elapsed().as_millis() as u64,
    }
}

fn render_path(tree: &ReasoningTree, node_id: &NodeId) -> String {
    let path = tree.path_to(node_id);
    if path.is_empty() {
        return "(empty)".to_owned();
    }
    path.iter()
        .enumerate()
        .filter_map(|(depth, id)| {
            tree.node(id)
                .map(|node| format!("{}. {}", depth + 1, node.thought))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_candidates(value: &Value) -> Vec<(String, ThoughtType)> {
    let items = match value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => map
            .get("children")
            .and_then(Value::as_array)
            .map_or(&[][..], Vec::as_slice),
        _ => &[],
    };
    items
        .iter()
        .filter_map(|item| {
            let thought = item.get("thought").and_then(Value::as_str)?;
            let thought_type = item
                .get("thought_type")
                .and_then(Value::as_str)
                .map_or(ThoughtType::Hypothesis, parse_thought_type);
            Some((thought.to_owned(), thought_type))
        })
        .collect()
}

fn parse_thought_type(tag: &str) -> ThoughtType {
    match tag.to_lowercase().as_str() {
        "analysis" => ThoughtType::Analysis,
        "alternative" => ThoughtType::Alternative,
        "evaluation" => ThoughtType::Evaluation,
        "conclusion" => ThoughtType::Conclusion,
        _ => ThoughtType::Hypothesis,
    }
}
