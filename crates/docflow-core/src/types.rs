//! Shared document and file types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reference to a file living in the external document storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    /// Storage-assigned file identifier
    pub id: String,
    /// File name including extension
    pub name: String,
    /// Folder the file currently lives in
    pub folder_id: String,
    /// MIME type reported by the storage
    pub mime_type: String,
    /// Size in bytes, when the storage reports it
    pub size_bytes: Option<u64>,
    /// Last modification time, when the storage reports it
    pub modified_at: Option<DateTime<Utc>>,
}

impl FileRef {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        folder_id: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            folder_id: folder_id.into(),
            mime_type: mime_type.into(),
            size_bytes: None,
            modified_at: None,
        }
    }

    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = Some(size_bytes);
        self
    }

    pub fn with_modified_at(mut self, at: DateTime<Utc>) -> Self {
        self.modified_at = Some(at);
        self
    }
}

/// A document tracked by the validation process.
///
/// Materialized by the watcher when a new file is detected, or by the
/// surrounding application when a document is uploaded directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Internal document identifier
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Backing file in the external storage
    pub file_id: String,
    /// Folder the backing file was found in
    pub folder_id: String,
    /// MIME type of the backing file
    pub mime_type: String,
    /// When the document record was created
    pub created_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn new(name: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            file_id: file_id.into(),
            folder_id: String::new(),
            mime_type: "application/octet-stream".to_string(),
            created_at: Utc::now(),
        }
    }

    /// Materialize a document record from a storage file reference.
    pub fn from_file(file: &FileRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: file.name.clone(),
            file_id: file.id.clone(),
            folder_id: file.folder_id.clone(),
            mime_type: file.mime_type.clone(),
            created_at: Utc::now(),
        }
    }
}
