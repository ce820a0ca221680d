//! Reasoning artifacts: the chain and tree data models persisted into
//! agent state for observability.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TreeExplorationStrategy;
use crate::ids::NodeId;

/// The role of one chain step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Understand the goal and constraints.
    Analysis,
    /// Lay out the approach.
    Planning,
    /// Commit to a strategy.
    Decision,
    /// Judge the plan and draw the conclusion.
    Evaluation,
}

/// One step of a chain-of-thought pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    /// 1-based position in the chain.
    pub step_number: usize,
    /// The step's reasoning text.
    pub reasoning: String,
    /// The step's role.
    pub step_type: StepType,
    /// Self-reported confidence in `[0, 1]`.
    pub confidence: f64,
    /// Key insights extracted by the step.
    #[serde(default)]
    pub insights: Vec<String>,
    /// Step duration in milliseconds.
    pub execution_time_ms: u64,
    /// Creation time.
    pub created_utc: DateTime<Utc>,
}

/// The artifact of one chain-of-thought pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningChain {
    /// The goal the chain reasoned about.
    pub goal: String,
    /// Completed steps, in order.
    #[serde(default)]
    pub steps: Vec<ReasoningStep>,
    /// The conclusion drawn by the evaluation step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_conclusion: Option<String>,
    /// Mean confidence over the completed steps.
    pub final_confidence: f64,
    /// Creation time.
    pub created_utc: DateTime<Utc>,
    /// Completion time, set by [`ReasoningChain::finalize`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_utc: Option<DateTime<Utc>>,
    /// Total wall-clock time of the pass in milliseconds.
    pub total_execution_time_ms: u64,
}

impl ReasoningChain {
    /// Start an empty chain for a goal.
    #[must_use]
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            steps: Vec::new(),
            final_conclusion: None,
            final_confidence: 0.0,
            created_utc: Utc::now(),
            completed_utc: None,
            total_execution_time_ms: 0,
        }
    }

    /// Append a completed step.
    pub fn push_step(&mut self, step: ReasoningStep) {
        self.steps.push(step);
    }

    /// Mean confidence over the steps completed so far.
    #[must_use]
    pub fn mean_confidence(&self) -> f64 {
        if self.steps.is_empty() {
            0.0
        } else {
            self.steps.iter().map(|step| step.confidence).sum::<f64>() / self.steps.len() as f64
        }
    }

    /// Close the chain: aggregate confidence, pick the conclusion, and
    /// stamp the completion time.
    ///
    /// The conclusion comes from the last step that offered one (the
    /// evaluation step in a full chain), falling back to the last step's
    /// reasoning text.
    pub fn finalize(&mut self, conclusion: Option<String>, total_execution_time_ms: u64) {
        self.final_confidence = self.mean_confidence();
        self.final_conclusion =
            conclusion.or_else(|| self.steps.last().map(|step| step.reasoning.clone()));
        self.completed_utc = Some(Utc::now());
        self.total_execution_time_ms = total_execution_time_ms;
    }
}

/// The kind of thought a tree node holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtType {
    /// A candidate idea to pursue.
    Hypothesis,
    /// A breakdown of a parent thought.
    Analysis,
    /// A different angle on the parent.
    Alternative,
    /// A judgment of a sibling or parent.
    Evaluation,
    /// A candidate final answer.
    Conclusion,
}

impl Default for ThoughtType {
    fn default() -> Self {
        Self::Hypothesis
    }
}

/// Lifecycle state of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Created, not yet scored.
    Generated,
    /// Scored and eligible for expansion.
    Evaluated,
    /// Children have been generated from it.
    Expanded,
    /// Removed from consideration; kept for auditability.
    Pruned,
    /// An acceptable final-answer candidate.
    Terminal,
}

/// One node of a reasoning tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtNode {
    /// Node id.
    pub id: NodeId,
    /// Parent node id; `None` for the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,
    /// Depth from the root, which sits at zero.
    pub depth: usize,
    /// The thought text.
    pub thought: String,
    /// The thought kind.
    pub thought_type: ThoughtType,
    /// Lifecycle state.
    pub state: NodeState,
    /// Evaluation score in `[0, 1]`, once evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Child node ids, in creation order.
    #[serde(default)]
    pub children: Vec<NodeId>,
}

/// The artifact of one tree-of-thoughts pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningTree {
    /// The goal the tree explored.
    pub goal: String,
    /// The root node id, once seeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_id: Option<NodeId>,
    /// All nodes, including pruned ones.
    #[serde(default)]
    pub nodes: BTreeMap<NodeId, ThoughtNode>,
    /// Root-to-leaf path backing the conclusion.
    #[serde(default)]
    pub best_path: Vec<NodeId>,
    /// Configured depth cap.
    pub max_depth_cap: usize,
    /// Configured node-count cap.
    pub max_nodes_cap: usize,
    /// Deepest level reached so far.
    pub current_max_depth: usize,
    /// Number of nodes in the tree.
    pub node_count: usize,
    /// The frontier strategy used.
    pub exploration_strategy: TreeExplorationStrategy,
}

impl ReasoningTree {
    /// Create an empty tree for a goal.
    #[must_use]
    pub fn new(
        goal: impl Into<String>,
        max_depth_cap: usize,
        max_nodes_cap: usize,
        exploration_strategy: TreeExplorationStrategy,
    ) -> Self {
        Self {
            goal: goal.into(),
            root_id: None,
            nodes: BTreeMap::new(),
            best_path: Vec::new(),
            max_depth_cap,
            max_nodes_cap,
            current_max_depth: 0,
            node_count: 0,
            exploration_strategy,
        }
    }

    /// Seed the root node. Replaces an existing root tree entirely.
    pub fn add_root(&mut self, thought: impl Into<String>, thought_type: ThoughtType) -> NodeId {
        let id = NodeId::fresh();
        self.nodes.clear();
        self.nodes.insert(
            id.clone(),
            ThoughtNode {
                id: id.clone(),
                parent_id: None,
                depth: 0,
                thought: thought.into(),
                thought_type,
                state: NodeState::Generated,
                score: None,
                children: Vec::new(),
            },
        );
        self.root_id = Some(id.clone());
        self.node_count = 1;
        self.current_max_depth = 0;
        self.best_path.clear();
        id
    }

    /// Add a child in state [`NodeState::Generated`]. Returns `None` when
    /// the node cap is reached, the parent is missing, or the child would
    /// exceed the depth cap.
    pub fn add_child(
        &mut self,
        parent_id: &NodeId,
        thought: impl Into<String>,
        thought_type: ThoughtType,
    ) -> Option<NodeId> {
        if self.node_count >= self.max_nodes_cap {
            return None;
        }
        let depth = self.nodes.get(parent_id)?.depth + 1;
        if depth > self.max_depth_cap {
            return None;
        }
        let id = NodeId::fresh();
        self.nodes.insert(
            id.clone(),
            ThoughtNode {
                id: id.clone(),
                parent_id: Some(parent_id.clone()),
                depth,
                thought: thought.into(),
                thought_type,
                state: NodeState::Generated,
                score: None,
                children: Vec::new(),
            },
        );
        if let Some(parent) = self.nodes.get_mut(parent_id) {
            parent.children.push(id.clone());
        }
        self.node_count += 1;
        self.current_max_depth = self.current_max_depth.max(depth);
        Some(id)
    }

    /// Look up a node.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&ThoughtNode> {
        self.nodes.get(id)
    }

    /// Score a node and move it to [`NodeState::Evaluated`], or to
    /// [`NodeState::Terminal`] when the evaluator accepts it as a final
    /// answer candidate.
    pub fn set_evaluation(&mut self, id: &NodeId, score: f64, terminal: bool) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.score = Some(score.clamp(0.0, 1.0));
            node.state = if terminal {
                NodeState::Terminal
            } else {
                NodeState::Evaluated
            };
        }
    }

    /// Mark a node as expanded.
    pub fn mark_expanded(&mut self, id: &NodeId) {
        if let Some(node) = self.nodes.get_mut(id)
            && node.state == NodeState::Evaluated
        {
            node.state = NodeState::Expanded;
        }
    }

    /// Transition a node and all its descendants to
    /// [`NodeState::Pruned`]. Pruned nodes stay in the tree for audit but
    /// are never re-selected.
    pub fn prune(&mut self, id: &NodeId) {
        let mut pending = vec![id.clone()];
        while let Some(current) = pending.pop() {
            if let Some(node) = self.nodes.get_mut(&current) {
                node.state = NodeState::Pruned;
                pending.extend(node.children.iter().cloned());
            }
        }
    }

    /// Returns `true` when the node cap is reached.
    #[must_use]
    pub const fn at_node_cap(&self) -> bool {
        self.node_count >= self.max_nodes_cap
    }

    /// Returns `true` when the depth cap is reached.
    #[must_use]
    pub const fn at_depth_cap(&self) -> bool {
        self.current_max_depth >= self.max_depth_cap
    }

    /// The root-to-node path for a node id.
    #[must_use]
    pub fn path_to(&self, id: &NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut current = Some(id.clone());
        while let Some(node_id) = current {
            let Some(node) = self.nodes.get(&node_id) else {
                break;
            };
            path.push(node_id);
            current = node.parent_id.clone();
        }
        path.reverse();
        path
    }

    /// Compute and store the best path: from the highest-scoring terminal
    /// node when one exists, else from the highest-scoring evaluated
    /// leaf; ties break toward the earlier node id for determinism.
    ///
    /// Nodes along the stored path that were expanded on the way keep
    /// their scores but are restored to [`NodeState::Evaluated`], so the
    /// persisted path only carries evaluated or terminal nodes.
    pub fn compute_best_path(&mut self) {
        let best_terminal = self.best_node_in(NodeState::Terminal);
        let chosen = best_terminal.or_else(|| self.best_node_in(NodeState::Evaluated));
        let Some(leaf_id) = chosen else {
            self.best_path.clear();
            return;
        };
        self.best_path = self.path_to(&leaf_id);
        for node_id in self.best_path.clone() {
            if let Some(node) = self.nodes.get_mut(&node_id)
                && node.state == NodeState::Expanded
            {
                node.state = NodeState::Evaluated;
            }
        }
    }

    fn best_node_in(&self, state: NodeState) -> Option<NodeId> {
        self.nodes
            .values()
            .filter(|node| node.state == state)
            .max_by(|a, b| {
                let score_a = a.score.unwrap_or(0.0);
                let score_b = b.score.unwrap_or(0.0);
                score_a
                    .partial_cmp(&score_b)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    // BTreeMap iteration is id-ordered; prefer the earlier
                    // id on score ties by inverting the id comparison.
                    .then_with(|| b.id.cmp(&a.id))
            })
            .map(|node| node.id.clone())
    }

    /// The thought of the last node on the best path.
    #[must_use]
    pub fn best_conclusion(&self) -> Option<&str> {
        let leaf = self.best_path.last()?;
        self.nodes.get(leaf).map(|node| node.thought.as_str())
    }
}
