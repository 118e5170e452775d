//! Per-item ingestion pipeline
//!
//! gate → fetch detail → fetch attachment → persist → upload → attach.
//! An item fails closed: detail fetch exhaustion abandons it entirely, but
//! attachment exhaustion still persists the text record (without a link) so
//! nothing extracted is lost. The URL cache is marked only on full success,
//! keeping partially processed items eligible for a later session.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::domain::{ThesisRecord, ThesisSummary};
use crate::fetcher::DetailFetcher;
use crate::gate::{DedupGate, GateDecision};
use crate::persist::IngestAdapter;
use crate::scheduler::batch::{ItemOutcome, ItemProcessor};
use crate::infrastructure::storage::StorageError;
use crate::scheduler::retry::{with_retry, with_retry_if, RetryPolicy};

pub struct HarvestPipeline {
    gate: DedupGate,
    fetcher: Arc<DetailFetcher>,
    adapter: Arc<IngestAdapter>,
    retry: RetryPolicy,
}

impl HarvestPipeline {
    pub fn new(
        gate: DedupGate,
        fetcher: Arc<DetailFetcher>,
        adapter: Arc<IngestAdapter>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            gate,
            fetcher,
            adapter,
            retry,
        }
    }

    async fn ingest(&self, item: &ThesisSummary) -> ItemOutcome {
        match self.gate.should_process(&item.external_id, &item.detail_url).await {
            Ok(GateDecision::Process) => {}
            Ok(GateDecision::Duplicate) | Ok(GateDecision::RecentlyAttempted) => {
                return ItemOutcome::Duplicate;
            }
            Err(e) => return ItemOutcome::Failed(format!("gate check: {e}")),
        }

        let detail = match with_retry(&self.retry, "detail fetch", || {
            self.fetcher.fetch_detail(&item.detail_url)
        })
        .await
        {
            Ok(detail) => detail,
            Err(e) => return ItemOutcome::Failed(format!("detail fetch: {e}")),
        };

        // Attachment trouble is recorded but never discards the text record.
        let mut attachment_error: Option<String> = None;
        let downloaded = match with_retry(&self.retry, "attachment download", || {
            self.fetcher.fetch_attachment(&detail)
        })
        .await
        {
            Ok(path) => path,
            Err(e) => {
                attachment_error = Some(format!("attachment download: {e}"));
                None
            }
        };

        let record = ThesisRecord::from_parts(item, &detail);
        match self.adapter.persist_record(&record).await {
            Ok(crate::infrastructure::repository::UpsertOutcome::Inserted) => {}
            Ok(crate::infrastructure::repository::UpsertOutcome::AlreadyExisted) => {
                // Another worker or session won the race since the gate check.
                debug!("upsert conflict on {}, treating as duplicate", item.external_id);
                self.gate.mark_processed(&item.detail_url).await;
                return ItemOutcome::Duplicate;
            }
            Err(e) => return ItemOutcome::Failed(format!("persist: {e}")),
        }

        let mut with_attachment = false;
        if let Some(path) = downloaded {
            // An auth failure affects every upload in the session; backing
            // off and re-sending the same credentials is wasted work.
            let upload = with_retry_if(
                &self.retry,
                "attachment upload",
                || self.adapter.upload_attachment(&path, &item.external_id),
                StorageError::is_retryable,
            )
            .await;
            match upload {
                Ok(stored) => match self.adapter.attach(&item.external_id, &stored).await {
                    Ok(()) => with_attachment = true,
                    Err(e) => attachment_error = Some(format!("attach link: {e}")),
                },
                Err(e) => attachment_error = Some(format!("attachment upload: {e}")),
            }
        }

        if let Some(reason) = attachment_error {
            // Record kept, cache not marked: the item stays eligible for an
            // attachment repair pass.
            warn!("❌ {} ingested without attachment: {}", item.external_id, reason);
            return ItemOutcome::Failed(reason);
        }

        self.gate.mark_processed(&item.detail_url).await;
        info!(
            "✅ {} ingested (attachment: {})",
            item.external_id, with_attachment
        );
        ItemOutcome::Ingested { with_attachment }
    }
}

#[async_trait]
impl ItemProcessor for HarvestPipeline {
    async fn process(&self, item: ThesisSummary) -> ItemOutcome {
        self.ingest(&item).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{ExtractorConfig, FieldExtractor};
    use crate::gate::ProcessedUrlCache;
    use crate::infrastructure::browser::ElementHandle;
    use crate::infrastructure::config::PortalConfig;
    use crate::infrastructure::repository::RecordRepository;
    use crate::test_utils::{MemoryRepository, MemoryStorage, MockDriver};
    use std::path::PathBuf;

    const DETAIL_HTML: &str = r#"<html><body>
        <h1 class="rubro">CONTRADICCIÓN DE TESIS. COMPETENCIA.</h1>
        <div class="texto-tesis">Texto íntegro...</div>
        <div class="precedentes">Precedente uno.</div>
    </body></html>"#;

    fn summary(id: &str) -> ThesisSummary {
        ThesisSummary {
            external_id: id.to_string(),
            title: "CONTRADICCIÓN DE TESIS".to_string(),
            detail_url: format!("https://p/detalle/tesis/{id}"),
            raw_metadata_text: String::new(),
            metadata: None,
        }
    }

    struct Fixture {
        driver: Arc<MockDriver>,
        repo: Arc<MemoryRepository>,
        storage: Arc<MemoryStorage>,
        pipeline: HarvestPipeline,
    }

    fn fixture() -> Fixture {
        let driver = Arc::new(MockDriver::new());
        let repo = Arc::new(MemoryRepository::new());
        let storage = Arc::new(MemoryStorage::new());

        let portal = PortalConfig {
            body_wait_secs: 1,
            download_timeout_secs: 1,
            ..PortalConfig::default()
        };
        let extractor =
            Arc::new(FieldExtractor::new(&ExtractorConfig::default(), &portal).unwrap());
        let fetcher = Arc::new(DetailFetcher::new(
            Arc::clone(&driver) as Arc<dyn crate::infrastructure::browser::BrowserDriver>,
            extractor,
            &portal,
        ));
        let adapter = Arc::new(IngestAdapter::new(
            Arc::clone(&storage) as Arc<dyn crate::infrastructure::storage::ObjectStorage>,
            Arc::clone(&repo) as Arc<dyn RecordRepository>,
            None,
        ));
        let gate = DedupGate::new(
            Arc::clone(&repo) as Arc<dyn RecordRepository>,
            ProcessedUrlCache::new(100),
        );
        let pipeline = HarvestPipeline::new(gate, fetcher, adapter, RetryPolicy::immediate(2));
        Fixture {
            driver,
            repo,
            storage,
            pipeline,
        }
    }

    #[tokio::test]
    async fn full_success_persists_record_and_attachment() {
        let f = fixture();
        let item = summary("2031001");
        f.driver.add_page(&item.detail_url, DETAIL_HTML).await;
        f.driver
            .add_affordance(
                &item.detail_url,
                ElementHandle {
                    id: 1,
                    text: "Descargar".to_string(),
                    href: None,
                },
            )
            .await;
        f.driver
            .script_download(&item.detail_url, Ok(Some(PathBuf::from("/tmp/2031001.pdf"))))
            .await;

        let outcome = f.pipeline.process(item).await;
        assert_eq!(outcome, ItemOutcome::Ingested { with_attachment: true });

        let record = f.repo.get("2031001").await.unwrap();
        assert!(record.has_attachment());
        assert_eq!(f.storage.uploads().await.len(), 1);
    }

    #[tokio::test]
    async fn known_record_is_skipped_before_any_fetch() {
        let f = fixture();
        let item = summary("2031002");
        let detail = crate::domain::ThesisDetail {
            detail_url: item.detail_url.clone(),
            heading: "H".to_string(),
            full_text: "t".to_string(),
            precedent_text: String::new(),
            attachment_url: None,
            raw_markup: String::new(),
        };
        f.repo.seed(ThesisRecord::from_parts(&item, &detail)).await;

        let outcome = f.pipeline.process(item).await;
        assert_eq!(outcome, ItemOutcome::Duplicate);
        assert_eq!(f.driver.navigations().await, 0, "no fetch for a known record");
    }

    #[tokio::test]
    async fn detail_fetch_exhaustion_abandons_item() {
        let f = fixture();
        let item = summary("2031003");
        // No page registered: every navigation fails.

        let outcome = f.pipeline.process(item.clone()).await;
        assert!(matches!(outcome, ItemOutcome::Failed(_)));
        assert!(f.repo.get("2031003").await.is_none());
        // Two attempts under the immediate(2) policy.
        assert_eq!(f.driver.navigations().await, 2);
    }

    #[tokio::test]
    async fn attachment_failure_still_persists_text_record() {
        let f = fixture();
        let item = summary("2031004");
        f.driver.add_page(&item.detail_url, DETAIL_HTML).await;
        f.driver
            .add_affordance(
                &item.detail_url,
                ElementHandle {
                    id: 3,
                    text: "Descargar".to_string(),
                    href: None,
                },
            )
            .await;
        f.driver
            .script_download(
                &item.detail_url,
                Err(crate::infrastructure::browser::DriverError::Interaction(
                    "stale element".to_string(),
                )),
            )
            .await;
        f.driver
            .script_download(
                &item.detail_url,
                Err(crate::infrastructure::browser::DriverError::Interaction(
                    "stale element".to_string(),
                )),
            )
            .await;

        let outcome = f.pipeline.process(item.clone()).await;
        assert!(matches!(outcome, ItemOutcome::Failed(_)));

        let record = f.repo.get("2031004").await.unwrap();
        assert!(!record.has_attachment(), "text record kept without a link");
        // Not cache-marked: a later session may repair the attachment.
        assert_eq!(f.pipeline.gate.cache_len().await, 0);
    }

    #[tokio::test]
    async fn transient_upload_failure_is_retried_to_success() {
        let f = fixture();
        let item = summary("2031007");
        f.driver.add_page(&item.detail_url, DETAIL_HTML).await;
        f.driver
            .add_affordance(
                &item.detail_url,
                ElementHandle {
                    id: 4,
                    text: "Descargar".to_string(),
                    href: None,
                },
            )
            .await;
        f.driver
            .script_download(&item.detail_url, Ok(Some(PathBuf::from("/tmp/2031007.pdf"))))
            .await;
        f.storage.fail_next_uploads(1);

        let outcome = f.pipeline.process(item).await;
        assert_eq!(outcome, ItemOutcome::Ingested { with_attachment: true });
        assert_eq!(f.storage.upload_attempts(), 2);
    }

    #[tokio::test]
    async fn auth_failure_on_upload_is_not_retried() {
        let f = fixture();
        let item = summary("2031006");
        f.driver.add_page(&item.detail_url, DETAIL_HTML).await;
        f.driver
            .add_affordance(
                &item.detail_url,
                ElementHandle {
                    id: 5,
                    text: "Descargar".to_string(),
                    href: None,
                },
            )
            .await;
        f.driver
            .script_download(&item.detail_url, Ok(Some(PathBuf::from("/tmp/2031006.pdf"))))
            .await;
        f.storage.reject_uploads_with_auth();

        let outcome = f.pipeline.process(item.clone()).await;
        assert!(matches!(outcome, ItemOutcome::Failed(_)));
        assert_eq!(
            f.storage.upload_attempts(),
            1,
            "rejected credentials end the retry loop"
        );
        let record = f.repo.get("2031006").await.unwrap();
        assert!(!record.has_attachment());
    }

    #[tokio::test]
    async fn upsert_conflict_counts_as_duplicate() {
        let f = fixture();
        let item = summary("2031005");
        f.driver.add_page(&item.detail_url, DETAIL_HTML).await;

        // Simulate a concurrent winner between gate check and persist.
        f.repo.freeze_exists_checks().await;
        let detail = crate::domain::ThesisDetail {
            detail_url: item.detail_url.clone(),
            heading: "H".to_string(),
            full_text: "t".to_string(),
            precedent_text: String::new(),
            attachment_url: None,
            raw_markup: String::new(),
        };
        f.repo.seed(ThesisRecord::from_parts(&item, &detail)).await;

        let outcome = f.pipeline.process(item).await;
        assert_eq!(outcome, ItemOutcome::Duplicate);
    }
}
