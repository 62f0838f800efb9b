//! Workflow instance state: history, reviews and completion.

use chrono::{DateTime, Duration, Utc};
use docflow_core::DocumentRecord;
use docflow_graph::{Assignee, ReviewDecision, WorkflowDefinition};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How an instance reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceOutcome {
    /// A terminal node was reached normally
    Completed,
    /// A structural definition error forced completion
    Error,
}

/// One append-only entry in an instance's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub from_node: String,
    pub to_node: String,
    pub from_status: Option<String>,
    pub to_status: Option<String>,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// A single reviewer's requested decision on one review-node round.
///
/// Created when the instance enters a review node; mutated exactly once when
/// the reviewer submits; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowReview {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub node_id: String,
    /// Review round this request belongs to; re-entering the node starts a
    /// new round, so stale decisions never satisfy a later threshold
    pub round: u32,
    pub reviewer_id: String,
    pub reviewer_name: String,
    pub reviewer_email: String,
    pub requested_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub decision: ReviewDecision,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub observations: Option<String>,
    pub is_completed: bool,
}

impl WorkflowReview {
    pub fn new(instance_id: Uuid, node_id: &str, round: u32, assignee: &Assignee) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id,
            node_id: node_id.to_string(),
            round,
            reviewer_id: assignee.id.clone(),
            reviewer_name: assignee.name.clone(),
            reviewer_email: assignee.email.clone(),
            requested_at: Utc::now(),
            reviewed_at: None,
            decision: ReviewDecision::Pending,
            comment: None,
            observations: None,
            is_completed: false,
        }
    }

    pub fn complete(
        &mut self,
        decision: ReviewDecision,
        comment: Option<String>,
        observations: Option<String>,
    ) {
        self.decision = decision;
        self.comment = comment;
        self.observations = observations;
        self.reviewed_at = Some(Utc::now());
        self.is_completed = true;
    }
}

/// One running execution of a workflow definition, bound to one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub definition_id: String,
    /// Definition version pinned at start time
    pub definition_version: u32,
    pub document: DocumentRecord,
    pub current_node_id: String,
    pub current_status_id: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub history: Vec<HistoryEntry>,
    pub reviews: Vec<WorkflowReview>,
    /// Incremented each time a review node is (re-)entered
    pub review_round: u32,
    pub completed_at: Option<DateTime<Utc>>,
    pub outcome: Option<InstanceOutcome>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// Create a fresh instance resting on the definition's start node.
    pub fn new(definition: &WorkflowDefinition, start_node_id: &str, document: DocumentRecord) -> Self {
        let deadline = definition
            .settings
            .max_review_days
            .map(|days| Utc::now() + Duration::days(i64::from(days)));

        Self {
            id: Uuid::new_v4(),
            definition_id: definition.id.clone(),
            definition_version: definition.version,
            document,
            current_node_id: start_node_id.to_string(),
            current_status_id: None,
            deadline,
            history: Vec::new(),
            reviews: Vec::new(),
            review_round: 0,
            completed_at: None,
            outcome: None,
            created_at: Utc::now(),
        }
    }

    pub fn document_id(&self) -> Uuid {
        self.document.id
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Reviews requested for the given node occurrence (node id + round).
    pub fn reviews_for_round(&self, node_id: &str, round: u32) -> Vec<&WorkflowReview> {
        self.reviews
            .iter()
            .filter(|r| r.node_id == node_id && r.round == round)
            .collect()
    }

    /// Completed decisions for the given node occurrence, in submission order.
    pub fn completed_decisions(&self, node_id: &str, round: u32) -> Vec<ReviewDecision> {
        self.reviews
            .iter()
            .filter(|r| r.node_id == node_id && r.round == round && r.is_completed)
            .map(|r| r.decision)
            .collect()
    }

    pub fn push_history(
        &mut self,
        from_node: &str,
        to_node: &str,
        from_status: Option<String>,
        to_status: Option<String>,
        actor: &str,
        action: Option<String>,
        comment: Option<String>,
    ) {
        self.history.push(HistoryEntry {
            from_node: from_node.to_string(),
            to_node: to_node.to_string(),
            from_status,
            to_status,
            actor: actor.to_string(),
            timestamp: Utc::now(),
            action,
            comment,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_graph::{NodePayload, WorkflowNode, WorkflowSettings, WorkflowStatus};

    fn definition_with_deadline(days: Option<u32>) -> WorkflowDefinition {
        WorkflowDefinition::new("test")
            .with_status(WorkflowStatus::new("pending", "Pending").default_status())
            .with_node(WorkflowNode::new("start", "Start", NodePayload::Start))
            .with_settings(WorkflowSettings {
                max_review_days: days,
                ..Default::default()
            })
    }

    #[test]
    fn test_deadline_from_settings() {
        let doc = DocumentRecord::new("doc", "f-1");
        let with = WorkflowInstance::new(&definition_with_deadline(Some(5)), "start", doc.clone());
        assert!(with.deadline.is_some());

        let without = WorkflowInstance::new(&definition_with_deadline(None), "start", doc);
        assert!(without.deadline.is_none());
    }

    #[test]
    fn test_round_filtering() {
        let def = definition_with_deadline(None);
        let mut instance =
            WorkflowInstance::new(&def, "start", DocumentRecord::new("doc", "f-1"));

        let alice = Assignee::new("a", "Alice", "alice@example.com");
        let mut first_round = WorkflowReview::new(instance.id, "review", 1, &alice);
        first_round.complete(ReviewDecision::Rejected, None, None);
        instance.reviews.push(first_round);
        instance.reviews.push(WorkflowReview::new(instance.id, "review", 2, &alice));

        // The stale round-1 rejection must not leak into round 2.
        assert_eq!(instance.completed_decisions("review", 2), vec![]);
        assert_eq!(
            instance.completed_decisions("review", 1),
            vec![ReviewDecision::Rejected]
        );
        assert_eq!(instance.reviews_for_round("review", 2).len(), 1);
    }
}
