//! Persistence traits for definitions and instances, with in-memory
//! implementations used by tests and local deployments.

use crate::instance::WorkflowInstance;
use crate::Result;
use async_trait::async_trait;
use docflow_graph::WorkflowDefinition;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Storage for workflow definitions.
///
/// Definitions are versioned and immutable once published; `save` with an
/// existing id replaces the stored version wholesale.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    async fn save(&self, definition: WorkflowDefinition) -> Result<()>;

    async fn get(&self, definition_id: &str) -> Result<Option<Arc<WorkflowDefinition>>>;

    async fn delete(&self, definition_id: &str) -> Result<()>;

    async fn list(&self) -> Result<Vec<Arc<WorkflowDefinition>>>;

    async fn list_by_project(&self, project_id: &str) -> Result<Vec<Arc<WorkflowDefinition>>>;
}

/// Storage for workflow instances.
///
/// The engine saves after every mutation, so a restarted process can
/// rehydrate any active instance from here.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn save(&self, instance: &WorkflowInstance) -> Result<()>;

    async fn get(&self, instance_id: Uuid) -> Result<Option<WorkflowInstance>>;

    /// The active (not yet completed) instance bound to a storage file, if any.
    async fn find_active_by_file(&self, file_id: &str) -> Result<Option<WorkflowInstance>>;

    async fn list_by_definition(&self, definition_id: &str) -> Result<Vec<WorkflowInstance>>;
}

#[derive(Default)]
pub struct InMemoryDefinitionStore {
    definitions: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
}

impl InMemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DefinitionStore for InMemoryDefinitionStore {
    async fn save(&self, definition: WorkflowDefinition) -> Result<()> {
        self.definitions
            .write()
            .await
            .insert(definition.id.clone(), Arc::new(definition));
        Ok(())
    }

    async fn get(&self, definition_id: &str) -> Result<Option<Arc<WorkflowDefinition>>> {
        Ok(self.definitions.read().await.get(definition_id).cloned())
    }

    async fn delete(&self, definition_id: &str) -> Result<()> {
        self.definitions.write().await.remove(definition_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Arc<WorkflowDefinition>>> {
        Ok(self.definitions.read().await.values().cloned().collect())
    }

    async fn list_by_project(&self, project_id: &str) -> Result<Vec<Arc<WorkflowDefinition>>> {
        Ok(self
            .definitions
            .read()
            .await
            .values()
            .filter(|d| d.project_id.as_deref() == Some(project_id))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryInstanceStore {
    instances: RwLock<HashMap<Uuid, WorkflowInstance>>,
}

impl InMemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.instances.read().await.len()
    }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn save(&self, instance: &WorkflowInstance) -> Result<()> {
        self.instances
            .write()
            .await
            .insert(instance.id, instance.clone());
        Ok(())
    }

    async fn get(&self, instance_id: Uuid) -> Result<Option<WorkflowInstance>> {
        Ok(self.instances.read().await.get(&instance_id).cloned())
    }

    async fn find_active_by_file(&self, file_id: &str) -> Result<Option<WorkflowInstance>> {
        Ok(self
            .instances
            .read()
            .await
            .values()
            .find(|i| i.document.file_id == file_id && !i.is_completed())
            .cloned())
    }

    async fn list_by_definition(&self, definition_id: &str) -> Result<Vec<WorkflowInstance>> {
        Ok(self
            .instances
            .read()
            .await
            .values()
            .filter(|i| i.definition_id == definition_id)
            .cloned()
            .collect())
    }
}
