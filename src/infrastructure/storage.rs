//! Object-storage collaborator interface
//!
//! Attachments are uploaded to an external drive-style service. The service
//! does not dedupe by name; idempotent naming (`<external_id>.pdf`) is this
//! engine's responsibility.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub object_id: String,
    pub web_link: String,
}

/// File listing entry returned by storage queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub object_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Credential/authorization failure; fatal to the session at setup time.
    #[error("storage authentication failed: {0}")]
    Auth(String),

    #[error("upload of '{file_name}' failed: {reason}")]
    Upload { file_name: String, reason: String },

    #[error("folder operation failed: {0}")]
    Folder(String),

    #[error("storage query failed: {0}")]
    Query(String),
}

impl StorageError {
    /// Auth failures are configuration problems, not transient I/O.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Auth(_))
    }
}

/// Capability surface the engine requires from object storage.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(
        &self,
        local_path: &Path,
        file_name: &str,
        parent_folder_id: Option<&str>,
    ) -> Result<StoredObject, StorageError>;

    async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<String, StorageError>;

    async fn list_files(&self, query: &str) -> Result<Vec<FileMeta>, StorageError>;

    /// Cheap auth/reachability check used during session setup.
    async fn health_check(&self) -> Result<(), StorageError>;
}
