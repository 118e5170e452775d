//! In-memory collaborator doubles for tests
//!
//! Mirror the trait contracts faithfully (create-once upsert, add-only
//! attach, bounded download polling) so pipeline and engine tests exercise
//! real control flow without a browser, database or storage account.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::ThesisRecord;
use crate::infrastructure::browser::{BrowserDriver, DriverError, ElementHandle, ElementQuery};
use crate::infrastructure::repository::{
    PersistError, RecordRepository, UpsertOutcome,
};
use crate::infrastructure::storage::{FileMeta, ObjectStorage, StorageError, StoredObject};

/// Hash-map repository with the same create-once and add-only semantics as
/// the SQLite implementation.
#[derive(Default)]
pub struct MemoryRepository {
    records: Mutex<HashMap<String, ThesisRecord>>,
    /// When set, `exists_by_external_id` answers `false` regardless of
    /// contents, to reproduce the gate-check/persist race window.
    frozen_exists: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record directly, bypassing upsert accounting.
    pub async fn seed(&self, record: ThesisRecord) {
        self.records
            .lock()
            .await
            .insert(record.external_id.clone(), record);
    }

    pub async fn get(&self, external_id: &str) -> Option<ThesisRecord> {
        self.records.lock().await.get(external_id).cloned()
    }

    pub async fn freeze_exists_checks(&self) {
        self.frozen_exists.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordRepository for MemoryRepository {
    async fn exists_by_external_id(&self, external_id: &str) -> Result<bool, PersistError> {
        if self.frozen_exists.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(self.records.lock().await.contains_key(external_id))
    }

    async fn upsert_record(&self, record: &ThesisRecord) -> Result<UpsertOutcome, PersistError> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.external_id) {
            return Ok(UpsertOutcome::AlreadyExisted);
        }
        records.insert(record.external_id.clone(), record.clone());
        Ok(UpsertOutcome::Inserted)
    }

    async fn attach_object(
        &self,
        external_id: &str,
        object_id: &str,
        web_link: &str,
    ) -> Result<(), PersistError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(external_id)
            .ok_or_else(|| PersistError::NotFound(external_id.to_string()))?;
        if record.attachment_object_id.is_none() {
            record.attachment_object_id = Some(object_id.to_string());
            record.attachment_link = Some(web_link.to_string());
        }
        Ok(())
    }

    async fn count_records(&self) -> Result<u64, PersistError> {
        Ok(self.records.lock().await.len() as u64)
    }

    async fn records_missing_attachment(
        &self,
        limit: u32,
    ) -> Result<Vec<ThesisRecord>, PersistError> {
        let records = self.records.lock().await;
        let mut missing: Vec<ThesisRecord> = records
            .values()
            .filter(|r| r.attachment_object_id.is_none())
            .cloned()
            .collect();
        missing.sort_by(|a, b| a.ingested_at.cmp(&b.ingested_at));
        missing.truncate(limit as usize);
        Ok(missing)
    }
}

/// One logged upload call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCall {
    pub local_path: PathBuf,
    pub file_name: String,
    pub folder_id: Option<String>,
}

/// Storage double that logs uploads and can inject failures.
#[derive(Default)]
pub struct MemoryStorage {
    uploads: Mutex<Vec<UploadCall>>,
    upload_attempts: AtomicU32,
    fail_next_uploads: AtomicU32,
    reject_credentials: AtomicBool,
    unhealthy: AtomicBool,
    next_object: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn uploads(&self) -> Vec<UploadCall> {
        self.uploads.lock().await.clone()
    }

    /// Every upload call, including the rejected ones.
    pub fn upload_attempts(&self) -> u32 {
        self.upload_attempts.load(Ordering::SeqCst)
    }

    /// Fail the next `n` upload calls with a retryable error.
    pub fn fail_next_uploads(&self, n: u32) {
        self.fail_next_uploads.store(n, Ordering::SeqCst);
    }

    /// Fail every upload call with an auth error.
    pub fn reject_uploads_with_auth(&self) {
        self.reject_credentials.store(true, Ordering::SeqCst);
    }

    pub fn set_unhealthy(&self) {
        self.unhealthy.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn upload(
        &self,
        local_path: &Path,
        file_name: &str,
        parent_folder_id: Option<&str>,
    ) -> Result<StoredObject, StorageError> {
        self.upload_attempts.fetch_add(1, Ordering::SeqCst);
        if self.reject_credentials.load(Ordering::SeqCst) {
            return Err(StorageError::Auth("credentials rejected".to_string()));
        }
        let pending = self.fail_next_uploads.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_next_uploads.store(pending - 1, Ordering::SeqCst);
            return Err(StorageError::Upload {
                file_name: file_name.to_string(),
                reason: "injected upload failure".to_string(),
            });
        }
        self.uploads.lock().await.push(UploadCall {
            local_path: local_path.to_path_buf(),
            file_name: file_name.to_string(),
            folder_id: parent_folder_id.map(str::to_string),
        });
        let n = self.next_object.fetch_add(1, Ordering::SeqCst);
        Ok(StoredObject {
            object_id: format!("obj-{n}"),
            web_link: format!("https://drive.example/obj-{n}"),
        })
    }

    async fn create_folder(
        &self,
        name: &str,
        _parent_id: Option<&str>,
    ) -> Result<String, StorageError> {
        Ok(format!("folder-{name}"))
    }

    async fn list_files(&self, query: &str) -> Result<Vec<FileMeta>, StorageError> {
        let uploads = self.uploads.lock().await;
        Ok(uploads
            .iter()
            .enumerate()
            .filter(|(_, u)| u.file_name.contains(query))
            .map(|(i, u)| FileMeta {
                object_id: format!("obj-{i}"),
                name: u.file_name.clone(),
            })
            .collect())
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(StorageError::Auth("injected auth failure".to_string()));
        }
        Ok(())
    }
}

/// Scripted browser double. Pages are registered per URL; navigation to an
/// unregistered URL fails, so tests cover transient navigation errors by
/// simply not registering a page.
#[derive(Default)]
pub struct MockDriver {
    pages: Mutex<HashMap<String, String>>,
    current_url: Mutex<String>,
    affordances: Mutex<HashMap<String, Vec<ElementHandle>>>,
    /// Scripted `poll_download` results per URL, consumed in order. An empty
    /// queue reads as the bounded wait expiring.
    downloads: Mutex<HashMap<String, VecDeque<Result<Option<PathBuf>, DriverError>>>>,
    clicks: Mutex<Vec<u64>>,
    navigations: AtomicU32,
    unhealthy: AtomicBool,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_page(&self, url: &str, html: &str) {
        self.pages
            .lock()
            .await
            .insert(url.to_string(), html.to_string());
    }

    pub async fn add_affordance(&self, url: &str, handle: ElementHandle) {
        self.affordances
            .lock()
            .await
            .entry(url.to_string())
            .or_default()
            .push(handle);
    }

    pub async fn script_download(&self, url: &str, result: Result<Option<PathBuf>, DriverError>) {
        self.downloads
            .lock()
            .await
            .entry(url.to_string())
            .or_default()
            .push_back(result);
    }

    pub async fn clicks(&self) -> Vec<u64> {
        self.clicks.lock().await.clone()
    }

    /// Navigation attempts, including failed ones.
    pub async fn navigations(&self) -> u32 {
        self.navigations.load(Ordering::SeqCst)
    }

    pub fn set_unhealthy(&self) {
        self.unhealthy.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.navigations.fetch_add(1, Ordering::SeqCst);
        if !self.pages.lock().await.contains_key(url) {
            return Err(DriverError::Navigation {
                url: url.to_string(),
                reason: "no scripted page".to_string(),
            });
        }
        *self.current_url.lock().await = url.to_string();
        Ok(())
    }

    async fn wait_for_body(&self, _timeout: Duration) -> Result<(), DriverError> {
        Ok(())
    }

    async fn page_html(&self) -> Result<String, DriverError> {
        let current = self.current_url.lock().await.clone();
        self.pages
            .lock()
            .await
            .get(&current)
            .cloned()
            .ok_or_else(|| DriverError::Session("no page loaded".to_string()))
    }

    async fn find_all(&self, _query: &ElementQuery) -> Result<Vec<ElementHandle>, DriverError> {
        let current = self.current_url.lock().await.clone();
        Ok(self
            .affordances
            .lock()
            .await
            .get(&current)
            .cloned()
            .unwrap_or_default())
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), DriverError> {
        self.clicks.lock().await.push(element.id);
        Ok(())
    }

    async fn poll_download(&self, _timeout: Duration) -> Result<Option<PathBuf>, DriverError> {
        let current = self.current_url.lock().await.clone();
        match self
            .downloads
            .lock()
            .await
            .get_mut(&current)
            .and_then(VecDeque::pop_front)
        {
            Some(result) => result,
            None => Ok(None),
        }
    }

    async fn health_check(&self) -> Result<(), DriverError> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(DriverError::Session("injected session loss".to_string()));
        }
        Ok(())
    }
}
