//! Execution of the automatic actions attached to action nodes.

use docflow_adapters::{DocumentStorage, NotificationAdapter, RetryPolicy};
use docflow_core::DocumentRecord;
use docflow_graph::{ActionKind, ActionSpec};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Context an action runs in: the instance and its document.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub instance_id: Uuid,
    pub definition_id: String,
    pub node_id: String,
    pub document: DocumentRecord,
}

/// Result of one action in a node's action list.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub name: String,
    pub success: bool,
    pub error: Option<String>,
}

impl ActionOutcome {
    fn ok(name: &str) -> Self {
        Self {
            name: name.to_string(),
            success: true,
            error: None,
        }
    }

    fn failed(name: &str, error: impl std::fmt::Display) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// Runs a node's action list against the storage and notification adapters.
///
/// Actions run in definition order. A failed action is retried per the
/// retry policy, then recorded as failed; later actions still run and the
/// workflow still advances. Actions are side effects, not gates.
pub struct ActionExecutor {
    storage: Arc<dyn DocumentStorage>,
    notifier: Arc<dyn NotificationAdapter>,
    retry: RetryPolicy,
}

impl ActionExecutor {
    pub fn new(storage: Arc<dyn DocumentStorage>, notifier: Arc<dyn NotificationAdapter>) -> Self {
        Self {
            storage,
            notifier,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn execute_all(
        &self,
        actions: &[ActionSpec],
        ctx: &ActionContext,
    ) -> Vec<ActionOutcome> {
        let mut outcomes = Vec::with_capacity(actions.len());
        for action in actions {
            let outcome = self.execute_one(action, ctx).await;
            if outcome.success {
                info!(
                    instance_id = %ctx.instance_id,
                    node_id = %ctx.node_id,
                    action = %action.name,
                    "Action executed"
                );
            } else {
                error!(
                    instance_id = %ctx.instance_id,
                    node_id = %ctx.node_id,
                    action = %action.name,
                    error = outcome.error.as_deref().unwrap_or(""),
                    "Action failed, continuing"
                );
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn execute_one(&self, action: &ActionSpec, ctx: &ActionContext) -> ActionOutcome {
        let result = match &action.kind {
            ActionKind::MoveFile { target_folder_id } => self
                .retry
                .execute(|| self.storage.move_file(&ctx.document.file_id, target_folder_id))
                .await
                .map(|_| ()),
            ActionKind::CopyFile { target_folder_id } => self
                .retry
                .execute(|| self.storage.copy_file(&ctx.document.file_id, target_folder_id))
                .await
                .map(|_| ()),
            ActionKind::NotifyUser { user_id, message } => {
                let message = render_message(message, ctx);
                self.retry
                    .execute(|| self.notifier.notify_user(user_id, &message))
                    .await
            }
            ActionKind::SendComment { message } => {
                let message = render_message(message, ctx);
                self.retry
                    .execute(|| self.notifier.send_comment(&ctx.document.file_id, &message))
                    .await
            }
            ActionKind::UpdateMetadata { fields } => self
                .retry
                .execute(|| self.storage.update_metadata(&ctx.document.file_id, fields))
                .await,
            ActionKind::Webhook { url } => {
                let payload = serde_json::json!({
                    "instance_id": ctx.instance_id,
                    "definition_id": ctx.definition_id,
                    "node_id": ctx.node_id,
                    "document_id": ctx.document.id,
                    "document_name": ctx.document.name,
                    "file_id": ctx.document.file_id,
                });
                self.retry
                    .execute(|| self.notifier.post_webhook(url, &payload))
                    .await
            }
        };

        match result {
            Ok(()) => ActionOutcome::ok(&action.name),
            Err(e) => ActionOutcome::failed(&action.name, e),
        }
    }
}

/// Substitute document placeholders in notification messages.
fn render_message(template: &str, ctx: &ActionContext) -> String {
    template
        .replace("{document_name}", &ctx.document.name)
        .replace("{document_id}", &ctx.document.id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_adapters::{
        AdapterError, AdapterResult, Delivery, InMemoryDocumentStorage, InMemoryNotifier,
    };
    use async_trait::async_trait;
    use docflow_core::FileRef;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn fast_retry(max_attempts: usize) -> RetryPolicy {
        RetryPolicy::new(max_attempts)
            .with_backoff(Duration::from_millis(1), Duration::from_millis(2))
            .with_jitter(false)
    }

    fn context_for(file: &FileRef) -> ActionContext {
        ActionContext {
            instance_id: Uuid::new_v4(),
            definition_id: "wf-1".to_string(),
            node_id: "notify".to_string(),
            document: DocumentRecord::from_file(file),
        }
    }

    #[tokio::test]
    async fn test_actions_run_in_order() {
        let storage = Arc::new(InMemoryDocumentStorage::new());
        let notifier = Arc::new(InMemoryNotifier::new());
        let file = storage.put("inbox", "invoice.pdf", "application/pdf").await;

        let executor = ActionExecutor::new(storage.clone(), notifier.clone());
        let actions = vec![
            ActionSpec::new(
                "archive",
                ActionKind::MoveFile {
                    target_folder_id: "archive".to_string(),
                },
            ),
            ActionSpec::new(
                "inform",
                ActionKind::NotifyUser {
                    user_id: "u1".to_string(),
                    message: "{document_name} approved".to_string(),
                },
            ),
        ];

        let ctx = context_for(&file);
        let outcomes = executor.execute_all(&actions, &ctx).await;

        assert!(outcomes.iter().all(|o| o.success));
        assert_eq!(storage.list("archive").await.unwrap().len(), 1);

        let deliveries = notifier.deliveries().await;
        assert_eq!(
            deliveries[0],
            Delivery::User {
                user_id: "u1".to_string(),
                message: "invoice.pdf approved".to_string(),
            }
        );
    }

    struct FlakyNotifier {
        inner: InMemoryNotifier,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl NotificationAdapter for FlakyNotifier {
        async fn notify_user(&self, user_id: &str, message: &str) -> AdapterResult<()> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(AdapterError::ServiceUnavailable("503".to_string()));
            }
            self.inner.notify_user(user_id, message).await
        }

        async fn send_comment(&self, document_id: &str, message: &str) -> AdapterResult<()> {
            self.inner.send_comment(document_id, message).await
        }

        async fn post_webhook(&self, url: &str, payload: &serde_json::Value) -> AdapterResult<()> {
            self.inner.post_webhook(url, payload).await
        }
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let storage = Arc::new(InMemoryDocumentStorage::new());
        let notifier = Arc::new(FlakyNotifier {
            inner: InMemoryNotifier::new(),
            failures_left: AtomicUsize::new(1),
        });
        let file = storage.put("inbox", "doc.pdf", "application/pdf").await;

        let executor =
            ActionExecutor::new(storage, notifier.clone()).with_retry_policy(fast_retry(3));
        let actions = vec![ActionSpec::new(
            "inform",
            ActionKind::NotifyUser {
                user_id: "u1".to_string(),
                message: "please review".to_string(),
            },
        )];

        let outcomes = executor.execute_all(&actions, &context_for(&file)).await;
        assert!(outcomes[0].success);
        assert_eq!(notifier.inner.deliveries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_action_does_not_stop_later_ones() {
        let storage = Arc::new(InMemoryDocumentStorage::new());
        let notifier = Arc::new(InMemoryNotifier::new());
        let file = storage.put("inbox", "doc.pdf", "application/pdf").await;

        let executor =
            ActionExecutor::new(storage, notifier.clone()).with_retry_policy(fast_retry(1));
        let actions = vec![
            // Unknown file id, fails with NotFound.
            ActionSpec::new(
                "move-missing",
                ActionKind::MoveFile {
                    target_folder_id: "archive".to_string(),
                },
            ),
            ActionSpec::new(
                "inform",
                ActionKind::NotifyUser {
                    user_id: "u1".to_string(),
                    message: "done".to_string(),
                },
            ),
        ];

        let mut ctx = context_for(&file);
        ctx.document.file_id = "missing".to_string();

        let outcomes = executor.execute_all(&actions, &ctx).await;
        assert!(!outcomes[0].success);
        assert!(outcomes[0].error.as_deref().unwrap_or("").contains("not found"));
        assert!(outcomes[1].success);
        assert_eq!(notifier.deliveries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_webhook_payload_identifies_instance() {
        let storage = Arc::new(InMemoryDocumentStorage::new());
        let notifier = Arc::new(InMemoryNotifier::new());
        let file = storage.put("inbox", "doc.pdf", "application/pdf").await;

        let executor = ActionExecutor::new(storage, notifier.clone());
        let actions = vec![ActionSpec::new(
            "hook",
            ActionKind::Webhook {
                url: "https://example.com/hook".to_string(),
            },
        )];

        let ctx = context_for(&file);
        executor.execute_all(&actions, &ctx).await;

        match &notifier.deliveries().await[0] {
            Delivery::Webhook { url, payload } => {
                assert_eq!(url, "https://example.com/hook");
                assert_eq!(payload["instance_id"], ctx.instance_id.to_string());
                assert_eq!(payload["document_name"], "doc.pdf");
            }
            other => panic!("unexpected delivery: {other:?}"),
        }
    }
}
