//! Pure transition evaluation and reviewer-decision aggregation.

use crate::definition::{NodePayload, WorkflowDefinition, WorkflowNode};
use crate::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A reviewer's decision on a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Pending,
    Approved,
    Vso,
    Commented,
    ApprovedWithComments,
    Vao,
    VaoBlocking,
    Rejected,
    Refused,
}

impl ReviewDecision {
    /// Severity rank for aggregation; higher is more cautious.
    ///
    /// Order: refused > rejected > vao_blocking > vao >
    /// approved_with_comments > commented > vso > approved.
    pub fn severity(&self) -> u8 {
        match self {
            ReviewDecision::Pending => 0,
            ReviewDecision::Approved => 1,
            ReviewDecision::Vso => 2,
            ReviewDecision::Commented => 3,
            ReviewDecision::ApprovedWithComments => 4,
            ReviewDecision::Vao => 5,
            ReviewDecision::VaoBlocking => 6,
            ReviewDecision::Rejected => 7,
            ReviewDecision::Refused => 8,
        }
    }

    /// Branch key matched against decision-edge labels.
    pub fn branch_key(&self) -> &'static str {
        match self {
            ReviewDecision::Pending => "Pending",
            ReviewDecision::Approved => "Approved",
            ReviewDecision::Vso => "Vso",
            ReviewDecision::Commented => "Commented",
            ReviewDecision::ApprovedWithComments => "ApprovedWithComments",
            ReviewDecision::Vao => "Vao",
            ReviewDecision::VaoBlocking => "VaoBlocking",
            ReviewDecision::Rejected => "Rejected",
            ReviewDecision::Refused => "Refused",
        }
    }
}

/// Aggregate completed reviewer decisions for one review-node round.
///
/// Returns `None` while fewer than `required_approvals` decisions are in.
/// Precedence: any rejected/refused wins (most severe of the two), then any
/// blocking objection, then unanimity, then the most severe decision present.
/// Aggregation is deterministic and monotonic toward caution.
pub fn resolve_review_outcome(
    required_approvals: u32,
    decisions: &[ReviewDecision],
) -> Option<&'static str> {
    if decisions.len() < required_approvals.max(1) as usize {
        return None;
    }

    let hard_block = decisions
        .iter()
        .filter(|d| matches!(d, ReviewDecision::Rejected | ReviewDecision::Refused))
        .max_by_key(|d| d.severity());
    if let Some(decision) = hard_block {
        return Some(decision.branch_key());
    }

    if decisions.contains(&ReviewDecision::VaoBlocking) {
        return Some(ReviewDecision::VaoBlocking.branch_key());
    }

    let first = decisions[0];
    if decisions.iter().all(|d| *d == first) {
        return Some(first.branch_key());
    }

    decisions
        .iter()
        .max_by_key(|d| d.severity())
        .map(|d| d.branch_key())
}

/// Compiled, validated view of a workflow definition.
///
/// Holds an arena of nodes keyed by id and a `source -> [edges]` adjacency
/// index, so transition lookup is O(out-degree) and safe under cycles.
#[derive(Debug, Clone)]
pub struct GraphEvaluator {
    definition: Arc<WorkflowDefinition>,
    nodes: HashMap<String, usize>,
    outgoing: HashMap<String, Vec<usize>>,
}

impl GraphEvaluator {
    /// Compile a definition, validating its structural invariants first.
    pub fn new(definition: Arc<WorkflowDefinition>) -> Result<Self> {
        definition.validate()?;

        let mut nodes = HashMap::new();
        for (i, node) in definition.nodes.iter().enumerate() {
            nodes.insert(node.id.clone(), i);
        }

        let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, edge) in definition.edges.iter().enumerate() {
            outgoing.entry(edge.source.clone()).or_default().push(i);
        }

        Ok(Self {
            definition,
            nodes,
            outgoing,
        })
    }

    pub fn definition(&self) -> &Arc<WorkflowDefinition> {
        &self.definition
    }

    pub fn node(&self, node_id: &str) -> Result<&WorkflowNode> {
        self.nodes
            .get(node_id)
            .map(|&i| &self.definition.nodes[i])
            .ok_or_else(|| GraphError::UnknownNode(node_id.to_string()))
    }

    pub fn start_node_id(&self) -> &str {
        // validate() guarantees exactly one start node.
        &self
            .definition
            .nodes
            .iter()
            .find(|n| matches!(n.payload, NodePayload::Start))
            .expect("validated definition has a start node")
            .id
    }

    /// Compute the next node from `node_id`.
    ///
    /// Branching nodes resolve via exact, case-sensitive label match against
    /// `branch_key`. Non-branching nodes take their single outgoing edge; if
    /// several edges exist, exactly one unconditioned edge must remain.
    /// `Ok(None)` means the node is an `end` with nowhere further to go.
    pub fn next_node(&self, node_id: &str, branch_key: Option<&str>) -> Result<Option<String>> {
        let node = self.node(node_id)?;
        let edges: Vec<_> = self
            .outgoing
            .get(node_id)
            .map(|idxs| idxs.iter().map(|&i| &self.definition.edges[i]).collect())
            .unwrap_or_default();

        if let Some(branch) = branch_key {
            return match edges.iter().find(|e| e.label.as_deref() == Some(branch)) {
                Some(edge) => Ok(Some(edge.target.clone())),
                None => Err(GraphError::NoMatchingTransition {
                    node: node_id.to_string(),
                    branch: branch.to_string(),
                }),
            };
        }

        match edges.as_slice() {
            [] => {
                if matches!(node.payload, NodePayload::End) {
                    Ok(None)
                } else {
                    Err(GraphError::DeadEnd(node_id.to_string()))
                }
            }
            [edge] => Ok(Some(edge.target.clone())),
            several => {
                let unconditioned: Vec<_> = several
                    .iter()
                    .filter(|e| e.condition.is_none())
                    .collect();
                match unconditioned.as_slice() {
                    [edge] => Ok(Some(edge.target.clone())),
                    _ => Err(GraphError::AmbiguousTransition(node_id.to_string())),
                }
            }
        }
    }

    /// A node is terminal when its type is `end` or its mapped status is final.
    pub fn is_terminal(&self, node_id: &str) -> bool {
        match self.node(node_id) {
            Ok(node) => match &node.payload {
                NodePayload::End => true,
                NodePayload::Status { status_id } => self
                    .definition
                    .status(status_id)
                    .map(|s| s.is_final)
                    .unwrap_or(false),
                _ => false,
            },
            Err(_) => false,
        }
    }
}
