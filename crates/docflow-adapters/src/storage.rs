//! Document storage adapter: folder listing, upload, move/copy, metadata.

use crate::{AdapterError, AdapterResult};
use async_trait::async_trait;
use chrono::Utc;
use docflow_core::FileRef;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Interface to the third-party document storage.
#[async_trait]
pub trait DocumentStorage: Send + Sync {
    /// List the files currently in a folder.
    async fn list(&self, folder_id: &str) -> AdapterResult<Vec<FileRef>>;

    /// Upload a new file (content as base64) into a folder.
    async fn create(
        &self,
        folder_id: &str,
        name: &str,
        content_base64: &str,
        mime_type: &str,
    ) -> AdapterResult<FileRef>;

    /// Move a file to another folder.
    async fn move_file(&self, file_id: &str, target_folder_id: &str) -> AdapterResult<FileRef>;

    /// Copy a file into another folder, returning the new copy.
    async fn copy_file(&self, file_id: &str, target_folder_id: &str) -> AdapterResult<FileRef>;

    /// Update stored metadata fields on a file.
    async fn update_metadata(
        &self,
        file_id: &str,
        fields: &serde_json::Value,
    ) -> AdapterResult<()>;
}

/// In-memory storage used by tests and local development.
#[derive(Default)]
pub struct InMemoryDocumentStorage {
    folders: RwLock<HashMap<String, Vec<FileRef>>>,
    metadata: RwLock<HashMap<String, serde_json::Value>>,
}

impl InMemoryDocumentStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a file into a folder directly, bypassing the base64 path.
    pub async fn put(&self, folder_id: &str, name: &str, mime_type: &str) -> FileRef {
        let file = FileRef::new(Uuid::new_v4().to_string(), name, folder_id, mime_type)
            .with_modified_at(Utc::now());
        self.folders
            .write()
            .await
            .entry(folder_id.to_string())
            .or_default()
            .push(file.clone());
        file
    }

    pub async fn metadata_for(&self, file_id: &str) -> Option<serde_json::Value> {
        self.metadata.read().await.get(file_id).cloned()
    }

    async fn take_file(&self, file_id: &str) -> AdapterResult<FileRef> {
        let mut folders = self.folders.write().await;
        for files in folders.values_mut() {
            if let Some(pos) = files.iter().position(|f| f.id == file_id) {
                return Ok(files.remove(pos));
            }
        }
        Err(AdapterError::NotFound(format!("file {file_id}")))
    }

    async fn find_file(&self, file_id: &str) -> AdapterResult<FileRef> {
        let folders = self.folders.read().await;
        folders
            .values()
            .flatten()
            .find(|f| f.id == file_id)
            .cloned()
            .ok_or_else(|| AdapterError::NotFound(format!("file {file_id}")))
    }
}

#[async_trait]
impl DocumentStorage for InMemoryDocumentStorage {
    async fn list(&self, folder_id: &str) -> AdapterResult<Vec<FileRef>> {
        let folders = self.folders.read().await;
        Ok(folders.get(folder_id).cloned().unwrap_or_default())
    }

    async fn create(
        &self,
        folder_id: &str,
        name: &str,
        content_base64: &str,
        mime_type: &str,
    ) -> AdapterResult<FileRef> {
        if content_base64.is_empty() {
            return Err(AdapterError::InvalidRequest("empty file content".to_string()));
        }
        Ok(self.put(folder_id, name, mime_type).await)
    }

    async fn move_file(&self, file_id: &str, target_folder_id: &str) -> AdapterResult<FileRef> {
        let mut file = self.take_file(file_id).await?;
        file.folder_id = target_folder_id.to_string();
        file.modified_at = Some(Utc::now());
        self.folders
            .write()
            .await
            .entry(target_folder_id.to_string())
            .or_default()
            .push(file.clone());
        Ok(file)
    }

    async fn copy_file(&self, file_id: &str, target_folder_id: &str) -> AdapterResult<FileRef> {
        let source = self.find_file(file_id).await?;
        let mut copy = source.clone();
        copy.id = Uuid::new_v4().to_string();
        copy.folder_id = target_folder_id.to_string();
        copy.modified_at = Some(Utc::now());
        self.folders
            .write()
            .await
            .entry(target_folder_id.to_string())
            .or_default()
            .push(copy.clone());
        Ok(copy)
    }

    async fn update_metadata(
        &self,
        file_id: &str,
        fields: &serde_json::Value,
    ) -> AdapterResult<()> {
        // Validate existence so callers get NotFound rather than silence.
        self.find_file(file_id).await?;
        self.metadata
            .write()
            .await
            .insert(file_id.to_string(), fields.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_empty_folder() {
        let storage = InMemoryDocumentStorage::new();
        assert!(storage.list("inbox").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_move_between_folders() {
        let storage = InMemoryDocumentStorage::new();
        let file = storage.put("inbox", "doc.pdf", "application/pdf").await;

        let moved = storage.move_file(&file.id, "archive").await.unwrap();
        assert_eq!(moved.folder_id, "archive");
        assert!(storage.list("inbox").await.unwrap().is_empty());
        assert_eq!(storage.list("archive").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_copy_keeps_source() {
        let storage = InMemoryDocumentStorage::new();
        let file = storage.put("inbox", "doc.pdf", "application/pdf").await;

        let copy = storage.copy_file(&file.id, "backup").await.unwrap();
        assert_ne!(copy.id, file.id);
        assert_eq!(storage.list("inbox").await.unwrap().len(), 1);
        assert_eq!(storage.list("backup").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_move_unknown_file() {
        let storage = InMemoryDocumentStorage::new();
        let result = storage.move_file("missing", "anywhere").await;
        assert!(matches!(result, Err(AdapterError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_metadata() {
        let storage = InMemoryDocumentStorage::new();
        let file = storage.put("inbox", "doc.pdf", "application/pdf").await;

        storage
            .update_metadata(&file.id, &serde_json::json!({"status": "approved"}))
            .await
            .unwrap();

        let meta = storage.metadata_for(&file.id).await.unwrap();
        assert_eq!(meta["status"], "approved");
    }
}
