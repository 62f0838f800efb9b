//! Polling loops over definition source folders.

use crate::{Result, WatcherError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use docflow_adapters::DocumentStorage;
use docflow_core::{DocumentRecord, EventKind, WatcherConfig, WorkflowEvent};
use docflow_engine::WorkflowEngine;
use docflow_graph::WorkflowDefinition;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Read-only snapshot of one watch loop, for observability.
#[derive(Debug, Clone)]
pub struct WatcherHandle {
    pub id: Uuid,
    pub definition_id: String,
    pub folder_id: String,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub seen_files: usize,
    pub running: bool,
}

#[derive(Default)]
struct WatchState {
    /// File ids whose instance start already succeeded
    seen: HashSet<String>,
    last_poll_at: Option<DateTime<Utc>>,
}

struct WatchEntry {
    id: Uuid,
    definition: Arc<WorkflowDefinition>,
    source_folder_id: String,
    state: Arc<RwLock<WatchState>>,
    /// Serializes polls so a manual poll never overlaps the ticker's.
    poll_gate: Arc<Mutex<()>>,
    cancel: CancellationToken,
}

/// Watches source folders and starts workflow instances for new files.
///
/// One polling loop per watched definition; loops survive storage errors and
/// failed starts, retrying unprocessed files on the next tick.
pub struct FolderWatcher {
    engine: WorkflowEngine,
    storage: Arc<dyn DocumentStorage>,
    config: WatcherConfig,
    entries: Arc<DashMap<String, WatchEntry>>,
}

impl FolderWatcher {
    pub fn new(
        engine: WorkflowEngine,
        storage: Arc<dyn DocumentStorage>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            engine,
            storage,
            config,
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Begin watching a definition's source folder.
    pub fn watch(&self, definition: Arc<WorkflowDefinition>) -> Result<()> {
        let source_folder_id = definition
            .settings
            .source_folder_id
            .clone()
            .ok_or_else(|| WatcherError::MissingSourceFolder(definition.id.clone()))?;

        if !definition.settings.auto_start_on_upload {
            return Err(WatcherError::AutoStartDisabled(definition.id.clone()));
        }

        if self.entries.contains_key(&definition.id) {
            return Err(WatcherError::AlreadyWatching(definition.id.clone()));
        }

        let entry = WatchEntry {
            id: Uuid::new_v4(),
            definition: definition.clone(),
            source_folder_id: source_folder_id.clone(),
            state: Arc::new(RwLock::new(WatchState::default())),
            poll_gate: Arc::new(Mutex::new(())),
            cancel: CancellationToken::new(),
        };

        info!(
            definition_id = %definition.id,
            folder_id = %source_folder_id,
            interval_secs = self.config.poll_interval_secs,
            "Watching folder"
        );

        let cancel = entry.cancel.clone();
        let state = entry.state.clone();
        let poll_gate = entry.poll_gate.clone();
        let engine = self.engine.clone();
        let storage = self.storage.clone();
        let interval = self.config.poll_interval();
        let loop_definition = definition.clone();

        self.entries.insert(definition.id.clone(), entry);

        tokio::spawn(async move {
            // First tick lands one full interval after start.
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(definition_id = %loop_definition.id, "Watch loop stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        poll_folder(
                            &engine,
                            storage.as_ref(),
                            &loop_definition,
                            &source_folder_id,
                            &state,
                            &poll_gate,
                        )
                        .await;
                    }
                }
            }
        });

        Ok(())
    }

    /// Run one poll immediately, outside the timer cadence.
    pub async fn poll_now(&self, definition_id: &str) -> Result<()> {
        let (definition, folder_id, state, poll_gate) = {
            let entry = self
                .entries
                .get(definition_id)
                .ok_or_else(|| WatcherError::NotWatching(definition_id.to_string()))?;
            (
                entry.definition.clone(),
                entry.source_folder_id.clone(),
                entry.state.clone(),
                entry.poll_gate.clone(),
            )
        };

        poll_folder(
            &self.engine,
            self.storage.as_ref(),
            &definition,
            &folder_id,
            &state,
            &poll_gate,
        )
        .await;
        Ok(())
    }

    /// Stop watching a definition.
    pub fn stop(&self, definition_id: &str) -> Result<()> {
        let (_, entry) = self
            .entries
            .remove(definition_id)
            .ok_or_else(|| WatcherError::NotWatching(definition_id.to_string()))?;
        entry.cancel.cancel();
        info!(definition_id = %definition_id, "Stopped watching");
        Ok(())
    }

    pub fn stop_all(&self) {
        for entry in self.entries.iter() {
            entry.cancel.cancel();
        }
        self.entries.clear();
    }

    pub fn active_watchers(&self) -> Vec<WatcherHandle> {
        self.entries
            .iter()
            .map(|entry| {
                let state = entry.state.read();
                WatcherHandle {
                    id: entry.id,
                    definition_id: entry.key().clone(),
                    folder_id: entry.source_folder_id.clone(),
                    last_poll_at: state.last_poll_at,
                    seen_files: state.seen.len(),
                    running: !entry.cancel.is_cancelled(),
                }
            })
            .collect()
    }

    pub fn last_poll_at(&self, definition_id: &str) -> Option<DateTime<Utc>> {
        self.entries
            .get(definition_id)
            .and_then(|entry| entry.state.read().last_poll_at)
    }
}

impl Drop for FolderWatcher {
    fn drop(&mut self) {
        self.stop_all();
    }
}

async fn poll_folder(
    engine: &WorkflowEngine,
    storage: &dyn DocumentStorage,
    definition: &WorkflowDefinition,
    folder_id: &str,
    state: &Arc<RwLock<WatchState>>,
    poll_gate: &Mutex<()>,
) {
    // One poll at a time per definition; a manual poll and a ticker poll
    // must not race on the seen set.
    let _poll = poll_gate.lock().await;

    let files = match storage.list(folder_id).await {
        Ok(files) => files,
        Err(e) => {
            warn!(
                definition_id = %definition.id,
                folder_id = %folder_id,
                error = %e,
                "Folder listing failed"
            );
            engine
                .events()
                .publish(WorkflowEvent::new(
                    EventKind::Error,
                    None,
                    serde_json::json!({
                        "definition_id": definition.id,
                        "folder_id": folder_id,
                        "message": e.to_string(),
                    }),
                ))
                .await;
            state.write().last_poll_at = Some(Utc::now());
            return;
        }
    };

    let unseen: Vec<_> = {
        let state = state.read();
        files
            .into_iter()
            .filter(|f| !state.seen.contains(&f.id))
            .collect()
    };

    for file in unseen {
        let document = DocumentRecord::from_file(&file);
        match engine.start(&definition.id, document).await {
            Ok(instance) => {
                debug!(
                    definition_id = %definition.id,
                    file_id = %file.id,
                    instance_id = %instance.id,
                    "File picked up"
                );
                // Marked seen only after a successful start; a failure
                // leaves the file for the next poll.
                state.write().seen.insert(file.id);
            }
            Err(e) => {
                warn!(
                    definition_id = %definition.id,
                    file_id = %file.id,
                    error = %e,
                    "Failed to start instance for new file"
                );
            }
        }
    }

    state.write().last_poll_at = Some(Utc::now());
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docflow_adapters::{
        AdapterError, AdapterResult, InMemoryDocumentStorage, InMemoryNotifier, RetryPolicy,
    };
    use docflow_core::{EngineConfig, FileRef};
    use docflow_engine::{
        ActionExecutor, DefinitionStore, InMemoryDefinitionStore, InMemoryInstanceStore,
    };
    use docflow_graph::{NodePayload, WorkflowNode, WorkflowSettings, WorkflowStatus};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn watched_definition() -> WorkflowDefinition {
        WorkflowDefinition::new("Inbox intake")
            .with_id("wf-intake")
            .with_status(WorkflowStatus::new("pending", "Pending").default_status())
            .with_node(WorkflowNode::new("start", "Start", NodePayload::Start))
            .with_node(WorkflowNode::new(
                "pending",
                "Pending",
                NodePayload::Status {
                    status_id: "pending".to_string(),
                },
            ))
            .with_edge(docflow_graph::WorkflowEdge::new("start", "pending"))
            .with_settings(WorkflowSettings {
                source_folder_id: Some("inbox".to_string()),
                auto_start_on_upload: true,
                ..Default::default()
            })
    }

    async fn harness(
        storage: Arc<dyn DocumentStorage>,
    ) -> (FolderWatcher, WorkflowEngine, Arc<InMemoryDefinitionStore>) {
        let definitions = Arc::new(InMemoryDefinitionStore::new());
        let instances = Arc::new(InMemoryInstanceStore::new());
        let executor = Arc::new(
            ActionExecutor::new(
                Arc::new(InMemoryDocumentStorage::new()),
                Arc::new(InMemoryNotifier::new()),
            )
            .with_retry_policy(RetryPolicy::none()),
        );
        let engine = WorkflowEngine::new(
            definitions.clone(),
            instances,
            executor,
            EngineConfig::default(),
        );
        let watcher = FolderWatcher::new(engine.clone(), storage, WatcherConfig::default());
        (watcher, engine, definitions)
    }

    #[tokio::test]
    async fn missing_source_folder_is_refused() {
        let storage = Arc::new(InMemoryDocumentStorage::new());
        let (watcher, _, _) = harness(storage).await;

        let mut definition = watched_definition();
        definition.settings.source_folder_id = None;

        let err = watcher.watch(Arc::new(definition)).unwrap_err();
        assert!(matches!(err, WatcherError::MissingSourceFolder(_)));
    }

    #[tokio::test]
    async fn auto_start_disabled_is_refused() {
        let storage = Arc::new(InMemoryDocumentStorage::new());
        let (watcher, _, _) = harness(storage).await;

        let mut definition = watched_definition();
        definition.settings.auto_start_on_upload = false;

        let err = watcher.watch(Arc::new(definition)).unwrap_err();
        assert!(matches!(err, WatcherError::AutoStartDisabled(_)));
        assert!(watcher.active_watchers().is_empty());
    }

    #[tokio::test]
    async fn new_file_starts_an_instance_once() {
        let storage = Arc::new(InMemoryDocumentStorage::new());
        let (watcher, engine, definitions) = harness(storage.clone()).await;
        definitions.save(watched_definition()).await.unwrap();

        watcher.watch(Arc::new(watched_definition())).unwrap();
        let file = storage.put("inbox", "invoice.pdf", "application/pdf").await;

        watcher.poll_now("wf-intake").await.unwrap();
        let instance = engine
            .active_instance_for_file(&file.id)
            .await
            .unwrap()
            .expect("instance started for new file");
        assert_eq!(instance.current_status_id.as_deref(), Some("pending"));

        // A second poll must not start another instance for the same file.
        watcher.poll_now("wf-intake").await.unwrap();
        let again = engine
            .active_instance_for_file(&file.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.id, instance.id);
    }

    #[tokio::test]
    async fn empty_folder_polls_update_the_timestamp() {
        let storage = Arc::new(InMemoryDocumentStorage::new());
        let (watcher, _, definitions) = harness(storage).await;
        definitions.save(watched_definition()).await.unwrap();
        watcher.watch(Arc::new(watched_definition())).unwrap();

        watcher.poll_now("wf-intake").await.unwrap();
        let first = watcher.last_poll_at("wf-intake").unwrap();

        watcher.poll_now("wf-intake").await.unwrap();
        let second = watcher.last_poll_at("wf-intake").unwrap();
        assert!(second >= first);
    }

    struct FailingOnceStorage {
        inner: InMemoryDocumentStorage,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl DocumentStorage for FailingOnceStorage {
        async fn list(&self, folder_id: &str) -> AdapterResult<Vec<FileRef>> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(AdapterError::ServiceUnavailable("503".to_string()));
            }
            self.inner.list(folder_id).await
        }

        async fn create(
            &self,
            folder_id: &str,
            name: &str,
            content_base64: &str,
            mime_type: &str,
        ) -> AdapterResult<FileRef> {
            self.inner.create(folder_id, name, content_base64, mime_type).await
        }

        async fn move_file(&self, file_id: &str, target: &str) -> AdapterResult<FileRef> {
            self.inner.move_file(file_id, target).await
        }

        async fn copy_file(&self, file_id: &str, target: &str) -> AdapterResult<FileRef> {
            self.inner.copy_file(file_id, target).await
        }

        async fn update_metadata(
            &self,
            file_id: &str,
            fields: &serde_json::Value,
        ) -> AdapterResult<()> {
            self.inner.update_metadata(file_id, fields).await
        }
    }

    #[tokio::test]
    async fn listing_failure_is_reported_and_survived() {
        let storage = Arc::new(FailingOnceStorage {
            inner: InMemoryDocumentStorage::new(),
            fail_next: AtomicBool::new(true),
        });
        let (watcher, engine, definitions) = harness(storage.clone()).await;
        definitions.save(watched_definition()).await.unwrap();
        watcher.watch(Arc::new(watched_definition())).unwrap();

        let mut events = engine.subscribe().await;
        let file = storage.inner.put("inbox", "late.pdf", "application/pdf").await;

        // First poll hits the storage outage.
        watcher.poll_now("wf-intake").await.unwrap();
        let kinds: Vec<EventKind> = events.drain().into_iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&EventKind::Error));
        assert!(engine.active_instance_for_file(&file.id).await.unwrap().is_none());

        // Next poll recovers and picks the file up.
        watcher.poll_now("wf-intake").await.unwrap();
        assert!(engine.active_instance_for_file(&file.id).await.unwrap().is_some());
    }

    struct SlowListStorage {
        inner: InMemoryDocumentStorage,
    }

    #[async_trait]
    impl DocumentStorage for SlowListStorage {
        async fn list(&self, folder_id: &str) -> AdapterResult<Vec<FileRef>> {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.inner.list(folder_id).await
        }

        async fn create(
            &self,
            folder_id: &str,
            name: &str,
            content_base64: &str,
            mime_type: &str,
        ) -> AdapterResult<FileRef> {
            self.inner.create(folder_id, name, content_base64, mime_type).await
        }

        async fn move_file(&self, file_id: &str, target: &str) -> AdapterResult<FileRef> {
            self.inner.move_file(file_id, target).await
        }

        async fn copy_file(&self, file_id: &str, target: &str) -> AdapterResult<FileRef> {
            self.inner.copy_file(file_id, target).await
        }

        async fn update_metadata(
            &self,
            file_id: &str,
            fields: &serde_json::Value,
        ) -> AdapterResult<()> {
            self.inner.update_metadata(file_id, fields).await
        }
    }

    #[tokio::test]
    async fn overlapping_polls_start_a_file_only_once() {
        let storage = Arc::new(SlowListStorage {
            inner: InMemoryDocumentStorage::new(),
        });
        let definitions = Arc::new(InMemoryDefinitionStore::new());
        let instances = Arc::new(InMemoryInstanceStore::new());
        let executor = Arc::new(
            ActionExecutor::new(
                Arc::new(InMemoryDocumentStorage::new()),
                Arc::new(InMemoryNotifier::new()),
            )
            .with_retry_policy(RetryPolicy::none()),
        );
        let engine = WorkflowEngine::new(
            definitions.clone(),
            instances.clone(),
            executor,
            EngineConfig::default(),
        );
        let watcher =
            FolderWatcher::new(engine.clone(), storage.clone(), WatcherConfig::default());

        definitions.save(watched_definition()).await.unwrap();
        watcher.watch(Arc::new(watched_definition())).unwrap();
        let file = storage.inner.put("inbox", "double.pdf", "application/pdf").await;

        // Two polls racing over the same folder must serialize; the second
        // sees the file as already started.
        let (a, b) = tokio::join!(
            watcher.poll_now("wf-intake"),
            watcher.poll_now("wf-intake")
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(instances.count().await, 1);
        assert!(engine.active_instance_for_file(&file.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_start_is_retried_on_the_next_poll() {
        let storage = Arc::new(InMemoryDocumentStorage::new());
        let (watcher, engine, definitions) = harness(storage.clone()).await;

        // Definition not registered yet: the start fails and the file must
        // stay unseen.
        watcher.watch(Arc::new(watched_definition())).unwrap();
        let file = storage.put("inbox", "early.pdf", "application/pdf").await;
        watcher.poll_now("wf-intake").await.unwrap();
        assert!(engine.active_instance_for_file(&file.id).await.unwrap().is_none());

        definitions.save(watched_definition()).await.unwrap();
        watcher.poll_now("wf-intake").await.unwrap();
        assert!(engine.active_instance_for_file(&file.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stop_removes_the_watcher() {
        let storage = Arc::new(InMemoryDocumentStorage::new());
        let (watcher, _, definitions) = harness(storage).await;
        definitions.save(watched_definition()).await.unwrap();
        watcher.watch(Arc::new(watched_definition())).unwrap();
        let handles = watcher.active_watchers();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].definition_id, "wf-intake");
        assert_eq!(handles[0].folder_id, "inbox");
        assert!(handles[0].running);

        let err = watcher.watch(Arc::new(watched_definition())).unwrap_err();
        assert!(matches!(err, WatcherError::AlreadyWatching(_)));

        watcher.stop("wf-intake").unwrap();
        assert!(watcher.active_watchers().is_empty());
        assert!(matches!(
            watcher.poll_now("wf-intake").await,
            Err(WatcherError::NotWatching(_))
        ));
    }
}
