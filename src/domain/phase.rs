//! Operating phases and the durable phase configuration
//!
//! The engine runs under exactly two regimes: a bounded daily backfill
//! (`Initial`) and a bounded weekly refresh (`Maintenance`). The transition
//! between them is one-directional and permanent; `PhaseConfig` is the
//! durable singleton that records where the engine stands.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Progress share of the estimated corpus at which backfill is considered done.
pub const TRANSITION_PROGRESS_THRESHOLD: f64 = 0.95;
/// Backfill never runs longer than this before handing over to maintenance.
pub const TRANSITION_MAX_BACKFILL_DAYS: i64 = 30;
/// Maintenance cadence.
pub const MAINTENANCE_INTERVAL_DAYS: i64 = 7;

/// Operating regime. `Maintenance` is reachable from `Initial`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Initial,
    Maintenance,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// Durable phase state, loaded at engine start and saved at session end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub current_phase: Phase,
    /// Items ingested while in the initial phase, across all sessions.
    pub initial_items_ingested: u64,
    /// Operator-supplied estimate of the portal corpus size.
    pub total_estimated_items: u64,
    /// Stamped when the first initial-phase session starts.
    pub first_session_at: Option<DateTime<Utc>>,
    pub last_maintenance_at: Option<DateTime<Utc>>,
}

impl PhaseConfig {
    pub fn new(total_estimated_items: u64) -> Self {
        Self {
            current_phase: Phase::Initial,
            initial_items_ingested: 0,
            total_estimated_items,
            first_session_at: None,
            last_maintenance_at: None,
        }
    }

    /// Backfill progress in `[0.0, 1.0]`; zero estimate reads as no progress.
    pub fn progress_ratio(&self) -> f64 {
        if self.total_estimated_items == 0 {
            return 0.0;
        }
        (self.initial_items_ingested as f64 / self.total_estimated_items as f64).min(1.0)
    }

    /// Transition criterion, evaluated once at the end of every initial-phase
    /// session: progress >= 95% of the estimate, or 30 days elapsed since the
    /// first session.
    pub fn transition_due(&self, now: DateTime<Utc>) -> bool {
        if self.current_phase != Phase::Initial {
            return false;
        }
        if self.progress_ratio() >= TRANSITION_PROGRESS_THRESHOLD {
            return true;
        }
        match self.first_session_at {
            Some(first) => now - first >= Duration::days(TRANSITION_MAX_BACKFILL_DAYS),
            None => false,
        }
    }

    /// Pure function of `now - last_maintenance_at`; a maintenance run is due
    /// when none has happened yet or the last one is at least a week old.
    pub fn maintenance_due(&self, now: DateTime<Utc>) -> bool {
        if self.current_phase != Phase::Maintenance {
            return false;
        }
        match self.last_maintenance_at {
            Some(last) => now - last >= Duration::days(MAINTENANCE_INTERVAL_DAYS),
            None => true,
        }
    }
}

/// Append-only audit entry stamped when the engine changes phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub at: DateTime<Utc>,
    pub from: Phase,
    pub to: Phase,
    pub items_ingested: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_transition_at_95_percent() {
        let mut config = PhaseConfig::new(1000);
        config.initial_items_ingested = 949;
        assert!(!config.transition_due(Utc::now()));

        config.initial_items_ingested = 950;
        assert!(config.transition_due(Utc::now()));
    }

    #[test]
    fn elapsed_transition_after_30_days() {
        let mut config = PhaseConfig::new(1_000_000);
        let now = Utc::now();
        config.first_session_at = Some(now - Duration::days(29));
        assert!(!config.transition_due(now));

        config.first_session_at = Some(now - Duration::days(30));
        assert!(config.transition_due(now));
    }

    #[test]
    fn no_transition_check_applies_in_maintenance() {
        let mut config = PhaseConfig::new(10);
        config.current_phase = Phase::Maintenance;
        config.initial_items_ingested = 10;
        assert!(!config.transition_due(Utc::now()));
    }

    #[test]
    fn maintenance_due_weekly() {
        let mut config = PhaseConfig::new(10);
        let now = Utc::now();

        // Not yet in maintenance: never due.
        assert!(!config.maintenance_due(now));

        config.current_phase = Phase::Maintenance;
        assert!(config.maintenance_due(now), "first run is always due");

        config.last_maintenance_at = Some(now - Duration::days(6));
        assert!(!config.maintenance_due(now));

        config.last_maintenance_at = Some(now - Duration::days(7));
        assert!(config.maintenance_due(now));
    }

    #[test]
    fn zero_estimate_never_trips_progress_criterion() {
        let mut config = PhaseConfig::new(0);
        config.initial_items_ingested = 5000;
        assert_eq!(config.progress_ratio(), 0.0);
        assert!(!config.transition_due(Utc::now()));
    }
}
