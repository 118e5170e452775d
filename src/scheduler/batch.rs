//! Batch scheduler with a bounded worker pool
//!
//! Items are partitioned into fixed-size batches. Within a batch, items run
//! concurrently under a semaphore sized by the worker count (I/O-bound
//! parallelism, not CPU); between batches there is a synchronization barrier
//! plus a short pause, which bounds peak concurrency and keeps sustained
//! load off the portal. Cancellation and the session deadline stop the
//! dispatch of further work while letting in-flight items finish.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::ThesisSummary;
use crate::infrastructure::config::BatchSettings;
use crate::stats::SessionStats;

/// Terminal classification of one item's unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Ingested { with_attachment: bool },
    /// Short-circuited by the dedup gate; not an error.
    Duplicate,
    /// Retries exhausted or an unrecoverable per-item failure; the item is
    /// abandoned for this session and stays eligible for a future one.
    Failed(String),
}

/// One item's full unit of work: gate, fetch, persist.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(&self, item: ThesisSummary) -> ItemOutcome;
}

/// Partitions items and drives the worker pool.
pub struct BatchScheduler {
    settings: BatchSettings,
    processor: Arc<dyn ItemProcessor>,
}

impl BatchScheduler {
    pub fn new(settings: BatchSettings, processor: Arc<dyn ItemProcessor>) -> Self {
        Self {
            settings,
            processor,
        }
    }

    /// Run every item through the processor under the concurrency bounds.
    /// Returns how many items were dispatched; callers pre-truncate `items`
    /// to the remaining session budget.
    pub async fn run_batches(
        &self,
        items: &[ThesisSummary],
        stats: Arc<SessionStats>,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> u32 {
        let semaphore = Arc::new(Semaphore::new(self.settings.worker_count));
        let mut dispatched: u32 = 0;
        let batch_count = items.chunks(self.settings.batch_size).count();

        for (batch_index, batch) in items.chunks(self.settings.batch_size).enumerate() {
            if cancel.is_cancelled() {
                info!("cancellation requested, not dispatching further batches");
                break;
            }
            if Instant::now() >= deadline {
                info!("session time budget exhausted, stopping batch dispatch");
                break;
            }

            debug!(
                "dispatching batch {}/{} ({} items)",
                batch_index + 1,
                batch_count,
                batch.len()
            );

            let mut handles = Vec::with_capacity(batch.len());
            for item in batch {
                // Budget and cancellation are honored between items: work
                // already dispatched drains, nothing new starts.
                if cancel.is_cancelled() || Instant::now() >= deadline {
                    break;
                }

                let semaphore = Arc::clone(&semaphore);
                let processor = Arc::clone(&self.processor);
                let stats = Arc::clone(&stats);
                let item = item.clone();

                dispatched += 1;
                handles.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    let external_id = item.external_id.clone();
                    // The permit may have been waited on past the deadline;
                    // an item that has not started yet stays eligible for a
                    // future session.
                    if Instant::now() >= deadline {
                        debug!("time budget exhausted, {} not started", external_id);
                        return;
                    }
                    let outcome = processor.process(item).await;
                    match &outcome {
                        ItemOutcome::Ingested { with_attachment } => {
                            info!(
                                "✅ ingested {} (attachment: {})",
                                external_id, with_attachment
                            );
                        }
                        ItemOutcome::Duplicate => debug!("duplicate {}", external_id),
                        ItemOutcome::Failed(reason) => {
                            warn!("❌ abandoned {}: {}", external_id, reason);
                        }
                    }
                    stats.record_outcome(&outcome);
                }));
            }

            // Barrier: batch N+1 never starts before batch N fully returns.
            for joined in join_all(handles).await {
                if let Err(e) = joined {
                    warn!("worker task aborted: {}", e);
                    stats.record_error();
                }
            }

            let is_last = batch_index + 1 == batch_count;
            if !is_last && !cancel.is_cancelled() {
                sleep(Duration::from_millis(self.settings.batch_delay_ms)).await;
            }
        }

        dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Phase, SessionReport};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn summary(id: u32) -> ThesisSummary {
        ThesisSummary {
            external_id: format!("20{id:05}"),
            title: format!("TESIS {id}"),
            detail_url: format!("https://portal.example/t/{id}"),
            raw_metadata_text: String::new(),
            metadata: None,
        }
    }

    fn settings(batch_size: usize, worker_count: usize) -> BatchSettings {
        BatchSettings {
            batch_size,
            worker_count,
            batch_delay_ms: 0,
        }
    }

    /// Processor that tracks concurrency and fails chosen ids.
    struct TrackingProcessor {
        running: AtomicU32,
        peak: AtomicU32,
        processed: AtomicU32,
        fail_suffix: Option<char>,
    }

    impl TrackingProcessor {
        fn new(fail_suffix: Option<char>) -> Self {
            Self {
                running: AtomicU32::new(0),
                peak: AtomicU32::new(0),
                processed: AtomicU32::new(0),
                fail_suffix,
            }
        }
    }

    #[async_trait]
    impl ItemProcessor for TrackingProcessor {
        async fn process(&self, item: ThesisSummary) -> ItemOutcome {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(10)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.processed.fetch_add(1, Ordering::SeqCst);

            if self.fail_suffix == item.external_id.chars().last() {
                ItemOutcome::Failed("simulated".to_string())
            } else {
                ItemOutcome::Ingested {
                    with_attachment: true,
                }
            }
        }
    }

    #[tokio::test]
    async fn worker_pool_is_bounded() {
        let processor = Arc::new(TrackingProcessor::new(None));
        let scheduler = BatchScheduler::new(settings(8, 2), Arc::clone(&processor) as Arc<dyn ItemProcessor>);
        let items: Vec<_> = (0..8).map(summary).collect();

        let dispatched = scheduler
            .run_batches(
                &items,
                Arc::new(SessionStats::new()),
                &CancellationToken::new(),
                Instant::now() + Duration::from_secs(60),
            )
            .await;

        assert_eq!(dispatched, 8);
        assert!(processor.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn item_failure_never_aborts_the_batch() {
        // Ids ending in '3' fail (one item: 2000003).
        let processor = Arc::new(TrackingProcessor::new(Some('3')));
        let scheduler = BatchScheduler::new(settings(4, 4), Arc::clone(&processor) as Arc<dyn ItemProcessor>);
        let items: Vec<_> = (0..8).map(summary).collect();
        let stats = Arc::new(SessionStats::new());

        scheduler
            .run_batches(
                &items,
                Arc::clone(&stats),
                &CancellationToken::new(),
                Instant::now() + Duration::from_secs(60),
            )
            .await;

        assert_eq!(processor.processed.load(Ordering::SeqCst), 8);
        let mut report = SessionReport::begin(Phase::Initial);
        stats.apply_to(&mut report);
        assert_eq!(report.errors, 1);
        assert_eq!(report.items_downloaded, 7);
    }

    #[tokio::test]
    async fn cancellation_stops_new_dispatch() {
        let processor = Arc::new(TrackingProcessor::new(None));
        let scheduler = BatchScheduler::new(settings(2, 2), Arc::clone(&processor) as Arc<dyn ItemProcessor>);
        let items: Vec<_> = (0..6).map(summary).collect();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let dispatched = scheduler
            .run_batches(
                &items,
                Arc::new(SessionStats::new()),
                &cancel,
                Instant::now() + Duration::from_secs(60),
            )
            .await;

        assert_eq!(dispatched, 0);
        assert_eq!(processor.processed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiring_mid_batch_stops_remaining_items() {
        let processor = Arc::new(TrackingProcessor::new(None));
        let scheduler =
            BatchScheduler::new(settings(4, 1), Arc::clone(&processor) as Arc<dyn ItemProcessor>);
        let items: Vec<_> = (0..4).map(summary).collect();

        // One worker, 10ms per item, 25ms of budget: the items queued behind
        // the semaphore past the budget never start.
        scheduler
            .run_batches(
                &items,
                Arc::new(SessionStats::new()),
                &CancellationToken::new(),
                Instant::now() + Duration::from_millis(25),
            )
            .await;

        assert_eq!(processor.processed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn past_deadline_dispatches_nothing() {
        let processor = Arc::new(TrackingProcessor::new(None));
        let scheduler = BatchScheduler::new(settings(2, 2), Arc::clone(&processor) as Arc<dyn ItemProcessor>);
        let items: Vec<_> = (0..4).map(summary).collect();

        let dispatched = scheduler
            .run_batches(
                &items,
                Arc::new(SessionStats::new()),
                &CancellationToken::new(),
                Instant::now() - Duration::from_secs(1),
            )
            .await;

        assert_eq!(dispatched, 0);
    }
}
