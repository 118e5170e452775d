//! Dedup & cache gate
//!
//! Two independent checks before any fetch work starts: the persistence
//! store (authoritative — an existing record always short-circuits) and the
//! bounded processed-URL cache (advisory — avoids repeat network cost for
//! URLs already attempted in earlier sessions). The same external-id check
//! runs again as an upsert-conflict guard at persist time because workers
//! are concurrent.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::infrastructure::repository::{PersistError, RecordRepository};
use crate::infrastructure::state_store::StateStore;

/// Bounded, durable set of detail URLs already attempted.
///
/// Serialized once per session, not per item. When the cap is exceeded the
/// least-recently-updated half is truncated, so the cache never grows past
/// `max_entries` across saves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedUrlCache {
    entries: HashMap<String, DateTime<Utc>>,
    max_entries: usize,
    pub last_updated: DateTime<Utc>,
}

impl ProcessedUrlCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries,
            last_updated: Utc::now(),
        }
    }

    /// Restore from a persisted blob, adopting the currently configured cap.
    pub fn restore(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    pub fn insert(&mut self, url: &str) {
        let now = Utc::now();
        self.entries.insert(url.to_string(), now);
        self.last_updated = now;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Enforce the size bound: past the cap, keep only the most recently
    /// updated half.
    pub fn truncate_to_cap(&mut self) {
        if self.entries.len() <= self.max_entries {
            return;
        }
        let keep = self.max_entries / 2;
        let mut by_age: Vec<(String, DateTime<Utc>)> = self.entries.drain().collect();
        by_age.sort_by(|a, b| b.1.cmp(&a.1));
        by_age.truncate(keep);
        self.entries = by_age.into_iter().collect();
        debug!("url cache truncated to {} entries", self.entries.len());
    }
}

/// What the gate decided for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Process,
    /// A record with this external id already exists (authoritative).
    Duplicate,
    /// The detail URL was already attempted this cache epoch (advisory).
    RecentlyAttempted,
}

impl GateDecision {
    pub fn should_process(self) -> bool {
        matches!(self, Self::Process)
    }
}

/// Shared gate consulted by every worker before fetch work begins.
#[derive(Clone)]
pub struct DedupGate {
    repo: Arc<dyn RecordRepository>,
    cache: Arc<Mutex<ProcessedUrlCache>>,
}

impl DedupGate {
    pub fn new(repo: Arc<dyn RecordRepository>, cache: ProcessedUrlCache) -> Self {
        Self {
            repo,
            cache: Arc::new(Mutex::new(cache)),
        }
    }

    /// Both checks must pass; the durable check runs first and always wins.
    pub async fn should_process(
        &self,
        external_id: &str,
        detail_url: &str,
    ) -> Result<GateDecision, PersistError> {
        if self.repo.exists_by_external_id(external_id).await? {
            debug!("gate: {} already ingested", external_id);
            return Ok(GateDecision::Duplicate);
        }
        if self.cache.lock().await.contains(detail_url) {
            debug!("gate: {} already attempted this epoch", detail_url);
            return Ok(GateDecision::RecentlyAttempted);
        }
        Ok(GateDecision::Process)
    }

    /// Record a fully processed item. Called only on success so abandoned
    /// items stay eligible for a future session.
    pub async fn mark_processed(&self, detail_url: &str) {
        self.cache.lock().await.insert(detail_url);
    }

    /// Persist the cache once, at session end, after enforcing the bound.
    pub async fn persist(&self, store: &StateStore) -> anyhow::Result<()> {
        let mut cache = self.cache.lock().await;
        cache.truncate_to_cap();
        store.save_url_cache(&*cache).await
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub async fn cache_len(&self) -> usize {
        self.cache.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MemoryRepository;
    use crate::domain::ThesisRecord;
    use chrono::Duration;

    fn record(id: &str) -> ThesisRecord {
        ThesisRecord {
            external_id: id.to_string(),
            title: String::new(),
            detail_url: String::new(),
            heading: String::new(),
            full_text: String::new(),
            precedent_text: String::new(),
            attachment_object_id: None,
            attachment_link: None,
            ingested_at: Utc::now(),
            processed: true,
            analyzed: false,
        }
    }

    #[tokio::test]
    async fn store_hit_short_circuits_regardless_of_cache() {
        let repo = Arc::new(MemoryRepository::default());
        repo.seed(record("2010001")).await;

        let gate = DedupGate::new(repo, ProcessedUrlCache::new(100));
        let decision = gate
            .should_process("2010001", "https://portal.example/t/2010001")
            .await
            .unwrap();
        assert_eq!(decision, GateDecision::Duplicate);
    }

    #[tokio::test]
    async fn cache_hit_is_advisory_skip() {
        let repo = Arc::new(MemoryRepository::default());
        let mut cache = ProcessedUrlCache::new(100);
        cache.insert("https://portal.example/t/2010002");

        let gate = DedupGate::new(repo, cache);
        let decision = gate
            .should_process("2010002", "https://portal.example/t/2010002")
            .await
            .unwrap();
        assert_eq!(decision, GateDecision::RecentlyAttempted);
    }

    #[tokio::test]
    async fn unknown_item_passes_both_checks() {
        let repo = Arc::new(MemoryRepository::default());
        let gate = DedupGate::new(repo, ProcessedUrlCache::new(100));
        let decision = gate
            .should_process("2010003", "https://portal.example/t/2010003")
            .await
            .unwrap();
        assert!(decision.should_process());
    }

    #[test]
    fn cache_never_exceeds_cap_after_truncation() {
        let mut cache = ProcessedUrlCache::new(10);
        for i in 0..37 {
            cache.insert(&format!("https://portal.example/t/{i}"));
        }
        cache.truncate_to_cap();
        assert!(cache.len() <= 10);
        assert_eq!(cache.len(), 5, "keeps the newest half of the cap");
    }

    #[test]
    fn truncation_keeps_most_recently_updated() {
        let mut cache = ProcessedUrlCache::new(4);
        let base = Utc::now();
        for i in 0..8 {
            cache
                .entries
                .insert(format!("u{i}"), base + Duration::seconds(i));
        }
        cache.truncate_to_cap();
        assert!(cache.contains("u7"));
        assert!(cache.contains("u6"));
        assert!(!cache.contains("u0"));
    }
}
