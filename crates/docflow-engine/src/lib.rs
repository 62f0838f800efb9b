//! Workflow engine for document validation
//!
//! The engine owns workflow instances exclusively: it starts them, accepts
//! reviewer decisions, aggregates multi-reviewer consensus, runs automatic
//! actions and emits lifecycle events. Per-instance mutations are serialized
//! through a single-writer actor so concurrent submissions cannot race past
//! the completion check or double-trigger aggregation.

pub mod actions;
pub mod engine;
pub mod instance;
pub mod store;

pub use actions::{ActionContext, ActionExecutor, ActionOutcome};
pub use engine::{ReviewInput, WorkflowEngine};
pub use instance::{
    HistoryEntry, InstanceOutcome, WorkflowInstance, WorkflowReview,
};
pub use store::{
    DefinitionStore, InMemoryDefinitionStore, InMemoryInstanceStore, InstanceStore,
};

use docflow_graph::GraphError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workflow instance not found: {0}")]
    InstanceNotFound(Uuid),

    #[error("workflow instance {0} is completed and accepts no further mutation")]
    InstanceCompleted(Uuid),

    #[error("reviewer '{reviewer}' has no pending review on instance {instance}")]
    ReviewerNotAssigned { instance: Uuid, reviewer: String },

    #[error("instance {0} is waiting on reviewer decisions")]
    AwaitingReviews(Uuid),

    #[error("a submitted decision cannot be 'pending'")]
    PendingDecision,

    #[error("workflow definition not found: {0}")]
    DefinitionNotFound(String),

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("store error: {0}")]
    Store(String),

    #[error("engine is shutting down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, EngineError>;
