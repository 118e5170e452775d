//! Harvest engine: session orchestration and cadence
//!
//! The engine wires the collaborators together and runs bounded sessions:
//! discover summaries per search term, dispatch them through the batch
//! scheduler, fold the finalized report into durable state and let the
//! phase machine evaluate its one-way transition. Setup failures fail the
//! whole session before any item work starts; item failures never do.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::form_urlencoded;

use crate::domain::{Phase, PhaseConfig, SessionReport, SessionStatus, ThesisRecord, ThesisSummary};
use crate::extraction::{ExtractorConfig, FieldExtractor};
use crate::fetcher::DetailFetcher;
use crate::gate::{DedupGate, ProcessedUrlCache};
use crate::infrastructure::browser::BrowserDriver;
use crate::infrastructure::config::HarvesterConfig;
use crate::infrastructure::repository::RecordRepository;
use crate::infrastructure::state_store::StateStore;
use crate::infrastructure::storage::ObjectStorage;
use crate::persist::IngestAdapter;
use crate::phase_machine::PhaseStateMachine;
use crate::pipeline::HarvestPipeline;
use crate::scheduler::batch::{BatchScheduler, ItemProcessor};
use crate::scheduler::retry::with_retry;
use crate::stats::{build_status, CumulativeStats, SessionStats, StatusReport};

/// How often the unattended scheduler re-checks whether a session is due.
const SCHEDULER_TICK_SECS: u64 = 15 * 60;
/// Cadence of initial-phase sessions under the unattended scheduler.
const INITIAL_SESSION_INTERVAL_HOURS: i64 = 24;

pub struct HarvestEngine {
    driver: Arc<dyn BrowserDriver>,
    repo: Arc<dyn RecordRepository>,
    storage: Arc<dyn ObjectStorage>,
    store: Arc<StateStore>,
    config: HarvesterConfig,
    extractor: Arc<FieldExtractor>,
}

impl HarvestEngine {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        repo: Arc<dyn RecordRepository>,
        storage: Arc<dyn ObjectStorage>,
        store: Arc<StateStore>,
        config: HarvesterConfig,
        extractor_config: &ExtractorConfig,
    ) -> Result<Self> {
        config.validate().context("harvester config")?;
        let extractor = Arc::new(
            FieldExtractor::new(extractor_config, &config.portal)
                .context("compiling extraction locators")?,
        );
        Ok(Self {
            driver,
            repo,
            storage,
            store,
            config,
            extractor,
        })
    }

    /// Read-only status snapshot assembled from durable state; safe at any
    /// time, including while a session runs or right after a crash.
    pub async fn status(&self) -> Result<StatusReport> {
        let phase_config = match self.store.load_phase_config().await? {
            Some(config) => config,
            None => PhaseConfig::new(self.config.phases.total_estimated_items),
        };
        let cumulative = self
            .store
            .load_cumulative::<CumulativeStats>()
            .await?
            .unwrap_or_default();
        let history = self.store.load_session_history().await?;
        let total_records = self.repo.count_records().await?;
        Ok(build_status(
            &phase_config,
            &cumulative,
            &history,
            total_records,
            Utc::now(),
        ))
    }

    /// Run one backfill session now. Refused once the engine has moved to
    /// maintenance; the transition is one-way.
    pub async fn start_initial_phase(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SessionReport> {
        let machine =
            PhaseStateMachine::load(&self.store, self.config.phases.total_estimated_items).await?;
        if machine.phase() == Phase::Maintenance {
            bail!("backfill already complete; run a maintenance session instead");
        }
        self.run_session(Phase::Initial, None, cancel).await
    }

    /// Run one maintenance session now, regardless of cadence.
    pub async fn run_maintenance(&self, cancel: &CancellationToken) -> Result<SessionReport> {
        self.run_session(Phase::Maintenance, None, cancel).await
    }

    /// Operator-triggered session with an optional time-budget override.
    pub async fn run_manual_session(
        &self,
        phase: Phase,
        max_hours: Option<f64>,
        cancel: &CancellationToken,
    ) -> Result<SessionReport> {
        self.run_session(phase, max_hours, cancel).await
    }

    /// Unattended cadence loop: daily backfill sessions until the phase
    /// machine transitions, weekly maintenance after. Runs until cancelled;
    /// a failed session is logged and the cadence continues.
    pub async fn start_scheduler(&self, cancel: CancellationToken) -> Result<()> {
        info!("⏰ scheduler started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.scheduler_tick(&cancel).await {
                error!("scheduled session failed: {:#}", e);
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(Duration::from_secs(SCHEDULER_TICK_SECS)) => {}
            }
        }
        info!("scheduler stopped");
        Ok(())
    }

    async fn scheduler_tick(&self, cancel: &CancellationToken) -> Result<()> {
        let machine =
            PhaseStateMachine::load(&self.store, self.config.phases.total_estimated_items).await?;
        match machine.phase() {
            Phase::Initial => {
                if self.initial_session_due().await? {
                    self.run_session(Phase::Initial, None, cancel).await?;
                }
            }
            Phase::Maintenance => {
                if machine.config().maintenance_due(Utc::now()) {
                    self.run_session(Phase::Maintenance, None, cancel).await?;
                }
            }
        }
        Ok(())
    }

    async fn initial_session_due(&self) -> Result<bool> {
        let history = self.store.load_session_history().await?;
        let last_start = history
            .iter()
            .rev()
            .find(|r| r.phase == Phase::Initial)
            .map(|r| r.started_at);
        Ok(match last_start {
            Some(at) => Utc::now() - at >= chrono::Duration::hours(INITIAL_SESSION_INTERVAL_HOURS),
            None => true,
        })
    }

    async fn run_session(
        &self,
        phase: Phase,
        max_hours_override: Option<f64>,
        cancel: &CancellationToken,
    ) -> Result<SessionReport> {
        let mut machine =
            PhaseStateMachine::load(&self.store, self.config.phases.total_estimated_items).await?;
        let mut report = SessionReport::begin(phase);
        info!("🚀 session {} starting ({} phase)", report.session_id, phase);
        if phase == Phase::Initial {
            machine
                .note_session_start(&self.store, report.started_at)
                .await?;
        }

        // Collaborator health is checked before any item work; a setup
        // failure fails the whole session with zero items attempted.
        if let Err(e) = self.setup_checks().await {
            report.finalize(SessionStatus::Failed);
            self.flush_report(&report).await;
            error!("session {} setup failed: {:#}", report.session_id, e);
            return Err(e);
        }

        let cache = match self.store.load_url_cache::<ProcessedUrlCache>().await? {
            Some(cache) => cache.restore(self.config.cache_max_entries),
            None => ProcessedUrlCache::new(self.config.cache_max_entries),
        };
        let gate = DedupGate::new(Arc::clone(&self.repo), cache);
        let fetcher = Arc::new(DetailFetcher::new(
            Arc::clone(&self.driver),
            Arc::clone(&self.extractor),
            &self.config.portal,
        ));
        let adapter = Arc::new(IngestAdapter::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.repo),
            self.config.storage_folder_id.clone(),
        ));
        let pipeline = Arc::new(HarvestPipeline::new(
            gate.clone(),
            Arc::clone(&fetcher),
            Arc::clone(&adapter),
            self.config.retry.clone(),
        ));
        let scheduler = BatchScheduler::new(
            self.config.batch.clone(),
            pipeline as Arc<dyn ItemProcessor>,
        );
        let stats = Arc::new(SessionStats::new());

        let job = self.config.phases.job(phase);
        let max_hours = max_hours_override.unwrap_or(job.max_hours_per_session);
        let deadline = Instant::now() + Duration::from_secs_f64(max_hours * 3600.0);
        let mut remaining = job.max_items_per_session;

        for term in &job.search_terms {
            if cancel.is_cancelled() || remaining == 0 || Instant::now() >= deadline {
                break;
            }
            match self.discover(term).await {
                Ok(summaries) => {
                    stats.add_found(summaries.len() as u32);
                    if summaries.is_empty() {
                        continue;
                    }
                    let take = (remaining as usize).min(summaries.len());
                    let dispatched = scheduler
                        .run_batches(&summaries[..take], Arc::clone(&stats), cancel, deadline)
                        .await;
                    remaining = remaining.saturating_sub(dispatched);
                }
                Err(e) => {
                    warn!("search '{}' failed: {:#}", term, e);
                    stats.record_error();
                }
            }
        }

        if phase == Phase::Maintenance && !cancel.is_cancelled() {
            self.repair_attachments(&fetcher, &adapter, cancel, deadline)
                .await;
        }

        stats.apply_to(&mut report);
        let status = if cancel.is_cancelled() {
            SessionStatus::Cancelled
        } else {
            SessionStatus::Completed
        };
        report.finalize(status);

        if let Err(e) = gate.persist(&self.store).await {
            warn!("url cache not persisted: {:#}", e);
        }
        self.flush_report(&report).await;
        machine.complete_session(&self.store, &report).await?;

        info!("{}", report.summary_line());
        Ok(report)
    }

    async fn setup_checks(&self) -> Result<()> {
        self.driver
            .health_check()
            .await
            .context("browser health check")?;
        self.storage
            .health_check()
            .await
            .context("storage health check")?;
        self.repo.count_records().await.context("record store check")?;
        Ok(())
    }

    /// Navigate to one search-results page and extract its summaries,
    /// de-duplicated by registry number within the pass.
    async fn discover(&self, term: &str) -> Result<Vec<ThesisSummary>> {
        let encoded: String = form_urlencoded::byte_serialize(term.as_bytes()).collect();
        let url = self
            .config
            .portal
            .search_url_template
            .replace("{term}", &encoded);

        with_retry(&self.config.retry, "search navigation", || {
            self.driver.navigate(&url)
        })
        .await?;
        self.driver
            .wait_for_body(Duration::from_secs(self.config.portal.body_wait_secs))
            .await?;
        let html = self.driver.page_html().await?;

        let mut summaries = self.extractor.extract_summaries(&html);
        let mut seen = HashSet::new();
        summaries.retain(|s| seen.insert(s.external_id.clone()));
        info!("🔍 '{}' yielded {} candidate items", term, summaries.len());
        Ok(summaries)
    }

    /// Maintenance extra: revisit records persisted without an attachment
    /// and try the download again. Failures are logged and skipped; the
    /// records stay eligible for the next pass.
    async fn repair_attachments(
        &self,
        fetcher: &Arc<DetailFetcher>,
        adapter: &Arc<IngestAdapter>,
        cancel: &CancellationToken,
        deadline: Instant,
    ) {
        let limit = self.config.phases.attachment_repair_limit;
        let pending = match self.repo.records_missing_attachment(limit).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!("attachment repair query failed: {:#}", e);
                return;
            }
        };
        if pending.is_empty() {
            return;
        }

        info!("🔧 retrying attachments for {} records", pending.len());
        for record in pending {
            if cancel.is_cancelled() || Instant::now() >= deadline {
                break;
            }
            match self.repair_one(fetcher, adapter, &record).await {
                Ok(true) => info!("🔧 attachment repaired for {}", record.external_id),
                Ok(false) => debug!("still no attachment for {}", record.external_id),
                Err(e) => debug!(
                    "attachment repair for {} failed: {:#}",
                    record.external_id, e
                ),
            }
        }
    }

    async fn repair_one(
        &self,
        fetcher: &Arc<DetailFetcher>,
        adapter: &Arc<IngestAdapter>,
        record: &ThesisRecord,
    ) -> Result<bool> {
        let detail = fetcher.fetch_detail(&record.detail_url).await?;
        let path = match fetcher.fetch_attachment(&detail).await? {
            Some(path) => path,
            None => return Ok(false),
        };
        let stored = adapter.upload_attachment(&path, &record.external_id).await?;
        adapter.attach(&record.external_id, &stored).await?;
        Ok(true)
    }

    /// Best-effort durable flush of a finalized report; a flush failure is
    /// logged, never escalated, so the session outcome itself survives.
    async fn flush_report(&self, report: &SessionReport) {
        if let Err(e) = self
            .store
            .push_session_report(report, self.config.session_history_cap)
            .await
        {
            warn!("session history not updated: {:#}", e);
        }
        match self.store.load_cumulative::<CumulativeStats>().await {
            Ok(loaded) => {
                let mut cumulative = loaded.unwrap_or_default();
                cumulative.absorb(report);
                if let Err(e) = self.store.save_cumulative(&cumulative).await {
                    warn!("cumulative stats not saved: {:#}", e);
                }
            }
            Err(e) => warn!("cumulative stats not updated: {:#}", e),
        }
    }
}
