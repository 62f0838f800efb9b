//! The workflow engine: instance lifecycle, consensus and traversal.
//!
//! Every instance is owned by a dedicated actor task; all mutations go
//! through its command mailbox, so two concurrent review submissions are
//! applied one after the other and the second sees the first's effect.

use crate::actions::{ActionContext, ActionExecutor};
use crate::instance::{InstanceOutcome, WorkflowInstance, WorkflowReview};
use crate::store::{DefinitionStore, InstanceStore};
use crate::{EngineError, Result};
use dashmap::DashMap;
use docflow_core::{DocumentRecord, EngineConfig, EventBus, EventKind, Subscription, WorkflowEvent};
use docflow_graph::{
    resolve_review_outcome, GraphEvaluator, NodePayload, ReviewDecision,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use uuid::Uuid;

/// A reviewer's decision submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewInput {
    pub reviewer_id: String,
    pub decision: ReviewDecision,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub observations: Option<String>,
}

impl ReviewInput {
    pub fn new(reviewer_id: impl Into<String>, decision: ReviewDecision) -> Self {
        Self {
            reviewer_id: reviewer_id.into(),
            decision,
            comment: None,
            observations: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

enum InstanceCommand {
    SubmitReview {
        input: ReviewInput,
        reply: oneshot::Sender<Result<WorkflowInstance>>,
    },
    Advance {
        actor: String,
        branch: Option<String>,
        reply: oneshot::Sender<Result<WorkflowInstance>>,
    },
    TimerFired {
        node_id: String,
    },
}

struct EngineInner {
    definitions: Arc<dyn DefinitionStore>,
    instances: Arc<dyn InstanceStore>,
    executor: Arc<ActionExecutor>,
    events: EventBus,
    config: EngineConfig,
    actors: Arc<DashMap<Uuid, mpsc::Sender<InstanceCommand>>>,
}

/// Entry point for starting and driving workflow instances.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

impl WorkflowEngine {
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        instances: Arc<dyn InstanceStore>,
        executor: Arc<ActionExecutor>,
        config: EngineConfig,
    ) -> Self {
        let events = EventBus::new(config.event_buffer);
        Self {
            inner: Arc::new(EngineInner {
                definitions,
                instances,
                executor,
                events,
                config,
                actors: Arc::new(DashMap::new()),
            }),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub async fn subscribe(&self) -> Subscription {
        self.inner.events.subscribe().await
    }

    /// Start an instance of a definition for a document.
    ///
    /// Starting is idempotent per backing file: if an active instance already
    /// tracks the document's file, that instance is returned unchanged.
    pub async fn start(
        &self,
        definition_id: &str,
        document: DocumentRecord,
    ) -> Result<WorkflowInstance> {
        if let Some(existing) = self
            .inner
            .instances
            .find_active_by_file(&document.file_id)
            .await?
        {
            info!(
                instance_id = %existing.id,
                file_id = %document.file_id,
                "Active instance already tracks this file"
            );
            return Ok(existing);
        }

        let definition = self
            .inner
            .definitions
            .get(definition_id)
            .await?
            .ok_or_else(|| EngineError::DefinitionNotFound(definition_id.to_string()))?;
        let evaluator = GraphEvaluator::new(definition)?;

        let instance = WorkflowInstance::new(
            evaluator.definition(),
            evaluator.start_node_id(),
            document,
        );
        let instance_id = instance.id;

        info!(
            instance_id = %instance_id,
            definition_id = %definition_id,
            document = %instance.document.name,
            "Starting workflow instance"
        );

        let (sender, receiver) = mpsc::channel(self.inner.config.mailbox_capacity);
        let mut actor = InstanceActor {
            instance,
            evaluator,
            executor: self.inner.executor.clone(),
            store: self.inner.instances.clone(),
            events: self.inner.events.clone(),
            self_sender: sender.clone(),
            actors: self.inner.actors.clone(),
        };

        actor.bootstrap().await?;
        let snapshot = actor.instance.clone();

        if !snapshot.is_completed() {
            self.inner.actors.insert(instance_id, sender);
            tokio::spawn(actor.run(receiver));
        }

        Ok(snapshot)
    }

    /// Submit one reviewer's decision for the instance's current review round.
    pub async fn submit_review(
        &self,
        instance_id: Uuid,
        input: ReviewInput,
    ) -> Result<WorkflowInstance> {
        if input.decision == ReviewDecision::Pending {
            return Err(EngineError::PendingDecision);
        }
        self.send_command(instance_id, |reply| InstanceCommand::SubmitReview {
            input,
            reply,
        })
        .await
    }

    /// Explicitly advance an instance resting on a status or decision node.
    pub async fn advance(
        &self,
        instance_id: Uuid,
        actor: &str,
        branch: Option<String>,
    ) -> Result<WorkflowInstance> {
        let actor = actor.to_string();
        self.send_command(instance_id, |reply| InstanceCommand::Advance {
            actor,
            branch,
            reply,
        })
        .await
    }

    /// Current persisted state of an instance.
    pub async fn get_instance(&self, instance_id: Uuid) -> Result<WorkflowInstance> {
        self.inner
            .instances
            .get(instance_id)
            .await?
            .ok_or(EngineError::InstanceNotFound(instance_id))
    }

    /// The active instance tracking a storage file, if any.
    pub async fn active_instance_for_file(
        &self,
        file_id: &str,
    ) -> Result<Option<WorkflowInstance>> {
        self.inner.instances.find_active_by_file(file_id).await
    }

    async fn send_command<F>(&self, instance_id: Uuid, make: F) -> Result<WorkflowInstance>
    where
        F: FnOnce(oneshot::Sender<Result<WorkflowInstance>>) -> InstanceCommand,
    {
        let sender = self.actor_sender(instance_id).await?;
        let (reply_tx, reply_rx) = oneshot::channel();

        if sender.send(make(reply_tx)).await.is_err() {
            // Actor finished between lookup and send; the store has the
            // final state.
            self.inner.actors.remove(&instance_id);
            let instance = self.get_instance(instance_id).await?;
            return if instance.is_completed() {
                Err(EngineError::InstanceCompleted(instance_id))
            } else {
                Err(EngineError::Shutdown)
            };
        }

        reply_rx.await.map_err(|_| EngineError::Shutdown)?
    }

    /// Resolve the actor mailbox for an instance, rehydrating from the store
    /// after a restart.
    async fn actor_sender(&self, instance_id: Uuid) -> Result<mpsc::Sender<InstanceCommand>> {
        if let Some(sender) = self.inner.actors.get(&instance_id) {
            return Ok(sender.clone());
        }

        let instance = self
            .inner
            .instances
            .get(instance_id)
            .await?
            .ok_or(EngineError::InstanceNotFound(instance_id))?;
        if instance.is_completed() {
            return Err(EngineError::InstanceCompleted(instance_id));
        }

        let definition = self
            .inner
            .definitions
            .get(&instance.definition_id)
            .await?
            .ok_or_else(|| EngineError::DefinitionNotFound(instance.definition_id.clone()))?;
        let evaluator = GraphEvaluator::new(definition)?;

        match self.inner.actors.entry(instance_id) {
            dashmap::mapref::entry::Entry::Occupied(entry) => Ok(entry.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                info!(instance_id = %instance_id, "Rehydrating instance actor");
                let (sender, receiver) = mpsc::channel(self.inner.config.mailbox_capacity);
                let actor = InstanceActor {
                    instance,
                    evaluator,
                    executor: self.inner.executor.clone(),
                    store: self.inner.instances.clone(),
                    events: self.inner.events.clone(),
                    self_sender: sender.clone(),
                    actors: self.inner.actors.clone(),
                };
                tokio::spawn(actor.run(receiver));
                entry.insert(sender.clone());
                Ok(sender)
            }
        }
    }
}

const SYSTEM_ACTOR: &str = "system";

/// Single-writer owner of one instance's state.
struct InstanceActor {
    instance: WorkflowInstance,
    evaluator: GraphEvaluator,
    executor: Arc<ActionExecutor>,
    store: Arc<dyn InstanceStore>,
    events: EventBus,
    self_sender: mpsc::Sender<InstanceCommand>,
    actors: Arc<DashMap<Uuid, mpsc::Sender<InstanceCommand>>>,
}

impl InstanceActor {
    /// Persist and announce the fresh instance, then auto-walk from start.
    async fn bootstrap(&mut self) -> Result<()> {
        self.store.save(&self.instance).await?;
        self.publish(
            EventKind::Started,
            serde_json::json!({
                "definition_id": self.instance.definition_id,
                "document_id": self.instance.document.id,
                "document_name": self.instance.document.name,
                "file_id": self.instance.document.file_id,
            }),
        )
        .await;

        self.walk(None, SYSTEM_ACTOR).await;
        self.persist().await;
        Ok(())
    }

    async fn run(mut self, mut receiver: mpsc::Receiver<InstanceCommand>) {
        while let Some(command) = receiver.recv().await {
            match command {
                InstanceCommand::SubmitReview { input, reply } => {
                    let result = self.handle_submit(input).await;
                    let _ = reply.send(result);
                }
                InstanceCommand::Advance {
                    actor,
                    branch,
                    reply,
                } => {
                    let result = self.handle_advance(&actor, branch).await;
                    let _ = reply.send(result);
                }
                InstanceCommand::TimerFired { node_id } => {
                    self.handle_timer(&node_id).await;
                }
            }

            if self.instance.is_completed() {
                self.actors.remove(&self.instance.id);
                break;
            }
        }
    }

    async fn handle_submit(&mut self, input: ReviewInput) -> Result<WorkflowInstance> {
        if self.instance.is_completed() {
            return Err(EngineError::InstanceCompleted(self.instance.id));
        }

        let node_id = self.instance.current_node_id.clone();
        let required = match &self.evaluator.node(&node_id)?.payload {
            NodePayload::Review {
                required_approvals, ..
            }
            | NodePayload::Parallel {
                required_approvals, ..
            } => *required_approvals,
            _ => {
                return Err(EngineError::ReviewerNotAssigned {
                    instance: self.instance.id,
                    reviewer: input.reviewer_id,
                })
            }
        };

        let round = self.instance.review_round;
        let position = self
            .instance
            .reviews
            .iter()
            .position(|r| {
                r.node_id == node_id && r.round == round && r.reviewer_id == input.reviewer_id
            })
            .ok_or_else(|| EngineError::ReviewerNotAssigned {
                instance: self.instance.id,
                reviewer: input.reviewer_id.clone(),
            })?;

        if self.instance.reviews[position].is_completed {
            // Duplicate submission; the first decision stands.
            info!(
                instance_id = %self.instance.id,
                reviewer = %input.reviewer_id,
                "Duplicate review submission ignored"
            );
            return Ok(self.instance.clone());
        }

        let comment = input.comment.clone();
        self.instance.reviews[position].complete(input.decision, input.comment, input.observations);
        self.instance.push_history(
            &node_id,
            &node_id,
            self.instance.current_status_id.clone(),
            self.instance.current_status_id.clone(),
            &input.reviewer_id,
            None,
            comment,
        );
        self.publish(
            EventKind::ReviewSubmitted,
            serde_json::json!({
                "node_id": node_id,
                "round": round,
                "reviewer_id": input.reviewer_id,
                "decision": input.decision,
            }),
        )
        .await;

        let decisions = self.instance.completed_decisions(&node_id, round);
        if let Some(branch) = resolve_review_outcome(required, &decisions) {
            info!(
                instance_id = %self.instance.id,
                node_id = %node_id,
                round = round,
                outcome = branch,
                "Review round resolved"
            );
            match self.evaluator.next_node(&node_id, None) {
                Ok(Some(next)) => {
                    self.enter(&next, SYSTEM_ACTOR, Some(format!("review outcome: {branch}")))
                        .await;
                    if !self.instance.is_completed() {
                        self.walk(Some(branch.to_string()), SYSTEM_ACTOR).await;
                    }
                }
                Ok(None) => self.complete(InstanceOutcome::Completed).await,
                Err(e) => self.error_complete(&e.into()).await,
            }
        }

        self.persist().await;
        Ok(self.instance.clone())
    }

    async fn handle_advance(
        &mut self,
        actor: &str,
        branch: Option<String>,
    ) -> Result<WorkflowInstance> {
        if self.instance.is_completed() {
            return Err(EngineError::InstanceCompleted(self.instance.id));
        }

        let node_id = self.instance.current_node_id.clone();
        if self.evaluator.node(&node_id)?.payload.is_review() {
            return Err(EngineError::AwaitingReviews(self.instance.id));
        }

        // Structural failures are fatal for the instance: it must never be
        // left silently stuck on a node it cannot leave.
        let next = match self.evaluator.next_node(&node_id, branch.as_deref()) {
            Ok(next) => next,
            Err(e) => {
                let err = EngineError::from(e);
                self.error_complete(&err).await;
                self.persist().await;
                return Err(err);
            }
        };

        match next {
            Some(next) => {
                self.enter(&next, actor, None).await;
                if !self.instance.is_completed() {
                    self.walk(None, actor).await;
                }
            }
            None => self.complete(InstanceOutcome::Completed).await,
        }

        self.persist().await;
        Ok(self.instance.clone())
    }

    async fn handle_timer(&mut self, node_id: &str) {
        if self.instance.is_completed() || self.instance.current_node_id != node_id {
            // Stale timer from a node the instance has already left.
            return;
        }

        info!(instance_id = %self.instance.id, node_id = %node_id, "Timer elapsed");
        match self.evaluator.next_node(node_id, None) {
            Ok(Some(next)) => {
                self.enter(&next, SYSTEM_ACTOR, None).await;
                if !self.instance.is_completed() {
                    self.walk(None, SYSTEM_ACTOR).await;
                }
            }
            Ok(None) => self.complete(InstanceOutcome::Completed).await,
            Err(e) => self.error_complete(&e.into()).await,
        }
        self.persist().await;
    }

    /// Advance through pass-through nodes until the instance rests or
    /// completes. `branch` is consumed by the first decision node reached.
    async fn walk(&mut self, mut branch: Option<String>, actor: &str) {
        loop {
            if self.instance.is_completed() {
                return;
            }

            let node_id = self.instance.current_node_id.clone();
            let payload = match self.evaluator.node(&node_id) {
                Ok(node) => node.payload.clone(),
                Err(e) => {
                    self.error_complete(&e.into()).await;
                    return;
                }
            };

            let step_branch = match payload {
                NodePayload::Start | NodePayload::Action { .. } => None,
                NodePayload::Decision => match branch.take() {
                    Some(key) => Some(key),
                    // Resting until a branch key arrives via advance.
                    None => return,
                },
                NodePayload::End => {
                    self.complete(InstanceOutcome::Completed).await;
                    return;
                }
                // Resting nodes: status until advanced, review until
                // resolved, timer until it fires.
                NodePayload::Status { .. }
                | NodePayload::Review { .. }
                | NodePayload::Parallel { .. }
                | NodePayload::Timer { .. } => return,
            };

            match self.evaluator.next_node(&node_id, step_branch.as_deref()) {
                Ok(Some(next)) => self.enter(&next, actor, None).await,
                Ok(None) => {
                    self.complete(InstanceOutcome::Completed).await;
                    return;
                }
                Err(e) => {
                    self.error_complete(&e.into()).await;
                    return;
                }
            }
        }
    }

    /// Move onto a node and apply its entry effects.
    async fn enter(&mut self, next_id: &str, actor: &str, comment: Option<String>) {
        let from = self.instance.current_node_id.clone();
        let from_status = self.instance.current_status_id.clone();

        let payload = match self.evaluator.node(next_id) {
            Ok(node) => node.payload.clone(),
            Err(e) => {
                self.error_complete(&e.into()).await;
                return;
            }
        };

        if let NodePayload::Status { status_id } = &payload {
            self.instance.current_status_id = Some(status_id.clone());
        }
        self.instance.current_node_id = next_id.to_string();
        self.instance.push_history(
            &from,
            next_id,
            from_status,
            self.instance.current_status_id.clone(),
            actor,
            None,
            comment,
        );

        self.publish(
            EventKind::Advanced,
            serde_json::json!({
                "from": from,
                "to": next_id,
                "status": self.instance.current_status_id,
            }),
        )
        .await;

        match payload {
            NodePayload::Status { status_id } => {
                let is_final = self
                    .evaluator
                    .definition()
                    .status(&status_id)
                    .map(|s| s.is_final)
                    .unwrap_or(false);
                if is_final {
                    self.complete(InstanceOutcome::Completed).await;
                }
            }
            NodePayload::Action { actions } => {
                self.run_actions(next_id, &actions).await;
            }
            NodePayload::Review { assignees, .. } | NodePayload::Parallel { assignees, .. } => {
                self.open_review_round(next_id, &assignees);
            }
            NodePayload::Timer { delay_secs } => {
                self.schedule_timer(next_id, delay_secs);
            }
            NodePayload::End => {
                self.complete(InstanceOutcome::Completed).await;
            }
            NodePayload::Start | NodePayload::Decision => {}
        }
    }

    async fn run_actions(&mut self, node_id: &str, actions: &[docflow_graph::ActionSpec]) {
        let ctx = ActionContext {
            instance_id: self.instance.id,
            definition_id: self.instance.definition_id.clone(),
            node_id: node_id.to_string(),
            document: self.instance.document.clone(),
        };

        let outcomes = self.executor.execute_all(actions, &ctx).await;
        for outcome in outcomes {
            self.instance.push_history(
                node_id,
                node_id,
                self.instance.current_status_id.clone(),
                self.instance.current_status_id.clone(),
                SYSTEM_ACTOR,
                Some(outcome.name.clone()),
                outcome.error.clone(),
            );
            // Failures are echoed as error events; they never gate the walk.
            let kind = if outcome.success {
                EventKind::ActionExecuted
            } else {
                EventKind::Error
            };
            self.publish(
                kind,
                serde_json::json!({
                    "node_id": node_id,
                    "action": outcome.name,
                    "success": outcome.success,
                    "error": outcome.error,
                }),
            )
            .await;
        }
    }

    /// Start a new review round: request a decision from every assignee.
    fn open_review_round(&mut self, node_id: &str, assignees: &[docflow_graph::Assignee]) {
        self.instance.review_round += 1;
        let round = self.instance.review_round;

        for assignee in assignees {
            self.instance
                .reviews
                .push(WorkflowReview::new(self.instance.id, node_id, round, assignee));
        }

        info!(
            instance_id = %self.instance.id,
            node_id = %node_id,
            round = round,
            reviewers = assignees.len(),
            "Review round opened"
        );
    }

    fn schedule_timer(&self, node_id: &str, delay_secs: u64) {
        let sender = self.self_sender.clone();
        let node_id = node_id.to_string();
        let instance_id = self.instance.id;

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(delay_secs)).await;
            if sender
                .send(InstanceCommand::TimerFired { node_id })
                .await
                .is_err()
            {
                warn!(instance_id = %instance_id, "Timer fired after instance actor stopped");
            }
        });
    }

    async fn complete(&mut self, outcome: InstanceOutcome) {
        if self.instance.is_completed() {
            return;
        }
        self.instance.completed_at = Some(chrono::Utc::now());
        self.instance.outcome = Some(outcome);

        info!(
            instance_id = %self.instance.id,
            outcome = ?outcome,
            status = self.instance.current_status_id.as_deref().unwrap_or(""),
            "Workflow instance completed"
        );
        self.publish(
            EventKind::Completed,
            serde_json::json!({
                "outcome": outcome,
                "status": self.instance.current_status_id,
            }),
        )
        .await;
    }

    /// A structural defect in the definition surfaced at runtime; the
    /// instance cannot make progress and is completed with an error outcome.
    async fn error_complete(&mut self, e: &EngineError) {
        error!(
            instance_id = %self.instance.id,
            node_id = %self.instance.current_node_id,
            error = %e,
            "Workflow instance failed"
        );
        self.publish(
            EventKind::Error,
            serde_json::json!({
                "node_id": self.instance.current_node_id,
                "message": e.to_string(),
            }),
        )
        .await;
        self.complete(InstanceOutcome::Error).await;
    }

    async fn persist(&self) {
        if let Err(e) = self.store.save(&self.instance).await {
            error!(instance_id = %self.instance.id, error = %e, "Failed to persist instance");
        }
    }

    async fn publish(&self, kind: EventKind, data: serde_json::Value) {
        self.events
            .publish(WorkflowEvent::new(kind, Some(self.instance.id), data))
            .await;
    }
}
