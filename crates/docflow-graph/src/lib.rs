//! Workflow definition graph and pure transition evaluation
//!
//! A workflow definition is an explicit node/edge graph with string-labeled
//! edges; cycles are legal (correction loops route a rejected document back
//! to an earlier review node). The evaluator computes transitions and
//! aggregates reviewer decisions without any side effects.

pub mod definition;
pub mod evaluator;

pub use definition::{
    ActionKind, ActionSpec, Assignee, NodePayload, WorkflowDefinition, WorkflowEdge,
    WorkflowNode, WorkflowSettings, WorkflowStatus,
};
pub use evaluator::{resolve_review_outcome, GraphEvaluator, ReviewDecision};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("no matching transition from node '{node}' for branch '{branch}'")]
    NoMatchingTransition { node: String, branch: String },

    #[error("ambiguous transition from node '{0}': more than one unconditioned edge")]
    AmbiguousTransition(String),

    #[error("dead end at node '{0}': no outgoing edges and node is not terminal")]
    DeadEnd(String),

    #[error("unknown node: '{0}'")]
    UnknownNode(String),

    #[error("definition has no start node")]
    MissingStart,

    #[error("definition has more than one start node")]
    MultipleStartNodes,

    #[error("start node '{0}' has incoming edges")]
    StartHasIncomingEdges(String),

    #[error("node '{0}' is not reachable from the start node")]
    UnreachableNode(String),

    #[error("duplicate node id: '{0}'")]
    DuplicateNodeId(String),

    #[error("edge references unknown node: '{from}' -> '{to}'")]
    DanglingEdge { from: String, to: String },

    #[error("decision node '{node}' has duplicate outgoing label '{label}'")]
    DuplicateDecisionLabel { node: String, label: String },

    #[error("decision node '{0}' has an outgoing edge without a label")]
    UnlabeledDecisionEdge(String),

    #[error("review node '{0}' must have exactly one outgoing edge")]
    ReviewFanOut(String),

    #[error("status node '{node}' references undeclared status '{status}'")]
    UnknownStatus { node: String, status: String },

    #[error("definition declares no default status")]
    MissingDefaultStatus,
}

pub type Result<T> = std::result::Result<T, GraphError>;
