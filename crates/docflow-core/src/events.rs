//! In-process event bus for workflow lifecycle notifications.
//!
//! Each subscriber owns a bounded channel; publishing never blocks on a slow
//! consumer — events for a full channel are dropped. Delivery is best-effort
//! notification, not a correctness mechanism.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Lifecycle event kinds emitted by the engine and the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Started,
    Advanced,
    ReviewSubmitted,
    ActionExecuted,
    Completed,
    Error,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::Started => "started",
            EventKind::Advanced => "advanced",
            EventKind::ReviewSubmitted => "review_submitted",
            EventKind::ActionExecuted => "action_executed",
            EventKind::Completed => "completed",
            EventKind::Error => "error",
        };
        f.write_str(s)
    }
}

/// A workflow lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    /// Unique event identifier
    pub id: Uuid,
    /// Event kind
    pub kind: EventKind,
    /// Instance the event refers to, if any (watcher poll errors carry none)
    pub instance_id: Option<Uuid>,
    /// Event payload
    pub data: serde_json::Value,
    /// When the event was emitted
    pub timestamp: DateTime<Utc>,
}

impl WorkflowEvent {
    pub fn new(kind: EventKind, instance_id: Option<Uuid>, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            instance_id,
            data,
            timestamp: Utc::now(),
        }
    }
}

/// A live subscription to the event bus.
///
/// Dropping the subscription closes its channel; the bus prunes closed
/// subscribers on the next publish.
pub struct Subscription {
    id: Uuid,
    receiver: mpsc::Receiver<WorkflowEvent>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Receive the next event, waiting until one arrives or the bus is dropped.
    pub async fn recv(&mut self) -> Option<WorkflowEvent> {
        self.receiver.recv().await
    }

    /// Receive an already-buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<WorkflowEvent> {
        self.receiver.try_recv().ok()
    }

    /// Drain all currently-buffered events.
    pub fn drain(&mut self) -> Vec<WorkflowEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

struct EventBusInner {
    subscribers: RwLock<HashMap<Uuid, mpsc::Sender<WorkflowEvent>>>,
    buffer: usize,
}

/// Multi-producer, multi-consumer broadcast bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    /// Create a bus whose subscribers each buffer up to `buffer` events.
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(EventBusInner {
                subscribers: RwLock::new(HashMap::new()),
                buffer: buffer.max(1),
            }),
        }
    }

    /// Register a new subscriber.
    pub async fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.inner.buffer);
        let id = Uuid::new_v4();
        self.inner.subscribers.write().await.insert(id, sender);

        tracing::debug!(subscriber_id = %id, "Event bus subscriber registered");

        Subscription { id, receiver }
    }

    /// Remove a subscriber explicitly.
    pub async fn unsubscribe(&self, id: Uuid) {
        self.inner.subscribers.write().await.remove(&id);
    }

    /// Broadcast an event to all subscribers.
    ///
    /// A subscriber whose buffer is full misses the event; a closed
    /// subscriber is removed.
    pub async fn publish(&self, event: WorkflowEvent) {
        let mut closed = Vec::new();
        {
            let subscribers = self.inner.subscribers.read().await;
            for (id, sender) in subscribers.iter() {
                match sender.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(
                            subscriber_id = %id,
                            kind = %event.kind,
                            "Slow event subscriber, dropping event"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        closed.push(*id);
                    }
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.inner.subscribers.write().await;
            for id in closed {
                subscribers.remove(&id);
            }
        }
    }

    /// Number of live subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().await.len()
    }
}
