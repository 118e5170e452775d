//! Ingestion adapter over the record store and object storage
//!
//! Gives the pipeline one seam for the two persistence collaborators.
//! Attachment uploads use the registry number as the file name, so a retry
//! after a partial failure overwrites rather than duplicates.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::ThesisRecord;
use crate::infrastructure::repository::{PersistError, RecordRepository, UpsertOutcome};
use crate::infrastructure::storage::{ObjectStorage, StorageError, StoredObject};

pub struct IngestAdapter {
    storage: Arc<dyn ObjectStorage>,
    repo: Arc<dyn RecordRepository>,
    folder_id: Option<String>,
}

impl IngestAdapter {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        repo: Arc<dyn RecordRepository>,
        folder_id: Option<String>,
    ) -> Self {
        Self {
            storage,
            repo,
            folder_id,
        }
    }

    /// Insert-if-absent; the store is the arbiter of at-most-once ingestion.
    pub async fn persist_record(
        &self,
        record: &ThesisRecord,
    ) -> Result<UpsertOutcome, PersistError> {
        let outcome = self.repo.upsert_record(record).await?;
        if outcome == UpsertOutcome::Inserted {
            info!("✅ persisted record {}", record.external_id);
        } else {
            debug!("record {} already present", record.external_id);
        }
        Ok(outcome)
    }

    /// Upload the downloaded file under a name derived from the registry
    /// number. Idempotent across retries of the same item.
    pub async fn upload_attachment(
        &self,
        path: &Path,
        external_id: &str,
    ) -> Result<StoredObject, StorageError> {
        let file_name = format!("{external_id}.pdf");
        let stored = self
            .storage
            .upload(path, &file_name, self.folder_id.as_deref())
            .await?;
        debug!("uploaded {} as object {}", file_name, stored.object_id);
        Ok(stored)
    }

    /// Record the uploaded object against the record. Add-only: an existing
    /// attachment reference is never replaced.
    pub async fn attach(
        &self,
        external_id: &str,
        stored: &StoredObject,
    ) -> Result<(), PersistError> {
        self.repo
            .attach_object(external_id, &stored.object_id, &stored.web_link)
            .await
    }

    pub async fn health_check(&self) -> Result<(), StorageError> {
        self.storage.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ThesisDetail, ThesisSummary};
    use crate::test_utils::{MemoryRepository, MemoryStorage};
    use std::path::PathBuf;

    fn record(id: &str) -> ThesisRecord {
        let summary = ThesisSummary {
            external_id: id.to_string(),
            title: "Tesis de prueba".to_string(),
            detail_url: format!("https://p/detalle/tesis/{id}"),
            raw_metadata_text: String::new(),
            metadata: None,
        };
        let detail = ThesisDetail {
            detail_url: summary.detail_url.clone(),
            heading: "RUBRO".to_string(),
            full_text: "texto".to_string(),
            precedent_text: String::new(),
            attachment_url: None,
            raw_markup: String::new(),
        };
        ThesisRecord::from_parts(&summary, &detail)
    }

    #[tokio::test]
    async fn second_persist_reports_already_existed() {
        let repo = Arc::new(MemoryRepository::new());
        let storage = Arc::new(MemoryStorage::new());
        let adapter = IngestAdapter::new(storage, Arc::clone(&repo) as Arc<dyn RecordRepository>, None);

        let rec = record("2029000");
        assert_eq!(
            adapter.persist_record(&rec).await.unwrap(),
            UpsertOutcome::Inserted
        );
        assert_eq!(
            adapter.persist_record(&rec).await.unwrap(),
            UpsertOutcome::AlreadyExisted
        );
    }

    #[tokio::test]
    async fn upload_names_file_by_registry_number() {
        let repo = Arc::new(MemoryRepository::new());
        let storage = Arc::new(MemoryStorage::new());
        let adapter = IngestAdapter::new(
            Arc::clone(&storage) as Arc<dyn ObjectStorage>,
            repo,
            Some("folder-1".to_string()),
        );

        let stored = adapter
            .upload_attachment(&PathBuf::from("/tmp/a.pdf"), "2029001")
            .await
            .unwrap();
        assert!(!stored.object_id.is_empty());

        let uploads = storage.uploads().await;
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].file_name, "2029001.pdf");
        assert_eq!(uploads[0].folder_id.as_deref(), Some("folder-1"));
    }

    #[tokio::test]
    async fn attach_is_add_only() {
        let repo = Arc::new(MemoryRepository::new());
        let storage = Arc::new(MemoryStorage::new());
        let adapter = IngestAdapter::new(
            storage,
            Arc::clone(&repo) as Arc<dyn RecordRepository>,
            None,
        );

        let rec = record("2029002");
        adapter.persist_record(&rec).await.unwrap();
        let first = StoredObject {
            object_id: "obj-a".to_string(),
            web_link: "https://drive/a".to_string(),
        };
        let second = StoredObject {
            object_id: "obj-b".to_string(),
            web_link: "https://drive/b".to_string(),
        };
        adapter.attach("2029002", &first).await.unwrap();
        adapter.attach("2029002", &second).await.unwrap();

        let stored = repo.get("2029002").await.unwrap();
        assert_eq!(stored.attachment_object_id.as_deref(), Some("obj-a"));
    }
}
