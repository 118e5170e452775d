//! Session statistics and the status surface
//!
//! Live counters use atomics because batch workers increment them
//! concurrently. Cumulative counters are day-keyed and persisted across
//! runs; `build_status` is a pure function over durable state so a status
//! read is safe at any time, including right after a crash.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Phase, PhaseConfig, SessionReport};
use crate::scheduler::batch::ItemOutcome;

/// Per-session counters, shared across batch workers.
#[derive(Debug, Default)]
pub struct SessionStats {
    items_found: AtomicU32,
    items_downloaded: AtomicU32,
    duplicates: AtomicU32,
    errors: AtomicU32,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_found(&self, n: u32) {
        self.items_found.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Ingested { .. } => {
                self.items_downloaded.fetch_add(1, Ordering::Relaxed);
            }
            ItemOutcome::Duplicate => {
                self.duplicates.fetch_add(1, Ordering::Relaxed);
            }
            ItemOutcome::Failed(_) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the live counters into the session report.
    pub fn apply_to(&self, report: &mut SessionReport) {
        report.items_found = self.items_found.load(Ordering::Relaxed);
        report.items_downloaded = self.items_downloaded.load(Ordering::Relaxed);
        report.duplicates = self.duplicates.load(Ordering::Relaxed);
        report.errors = self.errors.load(Ordering::Relaxed);
    }

    pub fn downloaded(&self) -> u32 {
        self.items_downloaded.load(Ordering::Relaxed)
    }
}

/// One day's worth of accumulated counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCounters {
    pub items_found: u32,
    pub items_downloaded: u32,
    pub duplicates: u32,
    pub errors: u32,
}

/// Durable counters across all sessions, keyed by UTC day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CumulativeStats {
    pub by_day: BTreeMap<String, DayCounters>,
    pub sessions_completed: u64,
    pub sessions_incomplete: u64,
}

impl CumulativeStats {
    /// Fold a finalized session into the daily buckets. Flushed at session
    /// end (best effort on abnormal termination), never per item.
    pub fn absorb(&mut self, report: &SessionReport) {
        let day = report.started_at.format("%Y-%m-%d").to_string();
        let bucket = self.by_day.entry(day).or_default();
        bucket.items_found += report.items_found;
        bucket.items_downloaded += report.items_downloaded;
        bucket.duplicates += report.duplicates;
        bucket.errors += report.errors;

        if report.status.is_complete() {
            self.sessions_completed += 1;
        } else {
            self.sessions_incomplete += 1;
        }
    }

    pub fn totals(&self) -> DayCounters {
        let mut totals = DayCounters::default();
        for day in self.by_day.values() {
            totals.items_found += day.items_found;
            totals.items_downloaded += day.items_downloaded;
            totals.duplicates += day.duplicates;
            totals.errors += day.errors;
        }
        totals
    }
}

/// Read-only status snapshot consumed by operators and by the phase
/// transition decision.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub phase: Phase,
    pub progress_percentage: f64,
    pub should_transition: bool,
    pub should_run_maintenance: bool,
    pub total_records: u64,
    pub initial_items_ingested: u64,
    pub total_estimated_items: u64,
    pub last_maintenance_at: Option<DateTime<Utc>>,
    pub sessions_completed: u64,
    pub sessions_incomplete: u64,
    pub totals: DayCounters,
    pub last_session: Option<SessionReport>,
}

/// Pure assembly of the status surface from durable state. No side effects,
/// callable at any time.
pub fn build_status(
    phase_config: &PhaseConfig,
    cumulative: &CumulativeStats,
    history: &[SessionReport],
    total_records: u64,
    now: DateTime<Utc>,
) -> StatusReport {
    StatusReport {
        phase: phase_config.current_phase,
        progress_percentage: phase_config.progress_ratio() * 100.0,
        should_transition: phase_config.transition_due(now),
        should_run_maintenance: phase_config.maintenance_due(now),
        total_records,
        initial_items_ingested: phase_config.initial_items_ingested,
        total_estimated_items: phase_config.total_estimated_items,
        last_maintenance_at: phase_config.last_maintenance_at,
        sessions_completed: cumulative.sessions_completed,
        sessions_incomplete: cumulative.sessions_incomplete,
        totals: cumulative.totals(),
        last_session: history.last().cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SessionStatus;

    #[test]
    fn outcomes_map_to_the_right_counters() {
        let stats = SessionStats::new();
        stats.add_found(9);
        for _ in 0..6 {
            stats.record_outcome(&ItemOutcome::Ingested {
                with_attachment: true,
            });
        }
        stats.record_outcome(&ItemOutcome::Duplicate);
        stats.record_outcome(&ItemOutcome::Duplicate);
        stats.record_outcome(&ItemOutcome::Failed("attachment timeout".to_string()));

        let mut report = SessionReport::begin(Phase::Initial);
        stats.apply_to(&mut report);
        assert_eq!(report.items_found, 9);
        assert_eq!(report.items_downloaded, 6);
        assert_eq!(report.duplicates, 2);
        assert_eq!(report.errors, 1);
    }

    #[test]
    fn cumulative_absorb_buckets_by_day_and_completion() {
        let mut cumulative = CumulativeStats::default();

        let mut completed = SessionReport::begin(Phase::Initial);
        completed.items_found = 10;
        completed.items_downloaded = 8;
        completed.finalize(SessionStatus::Completed);

        let mut failed = SessionReport::begin(Phase::Initial);
        failed.errors = 1;
        failed.finalize(SessionStatus::Failed);

        cumulative.absorb(&completed);
        cumulative.absorb(&failed);

        assert_eq!(cumulative.sessions_completed, 1);
        assert_eq!(cumulative.sessions_incomplete, 1);
        let totals = cumulative.totals();
        assert_eq!(totals.items_downloaded, 8);
        assert_eq!(totals.errors, 1);
    }

    #[test]
    fn status_is_pure_over_durable_state() {
        let mut phase_config = PhaseConfig::new(100);
        phase_config.initial_items_ingested = 96;

        let status = build_status(
            &phase_config,
            &CumulativeStats::default(),
            &[],
            96,
            Utc::now(),
        );
        assert_eq!(status.phase, Phase::Initial);
        assert!(status.should_transition);
        assert!((status.progress_percentage - 96.0).abs() < f64::EPSILON);
        assert!(!status.should_run_maintenance);
        assert!(status.last_session.is_none());
    }
}
