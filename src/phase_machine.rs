//! Phase lifecycle: one-way Initial → Maintenance
//!
//! Owns the durable `PhaseConfig` and evaluates the transition criterion
//! exactly once, at the end of each completed initial-phase session. There
//! is deliberately no path back to `Initial`; a failed session never mutates
//! the phase state beyond the first-session stamp.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::domain::{Phase, PhaseConfig, PhaseTransition, SessionReport, SessionStatus};
use crate::infrastructure::state_store::StateStore;

pub struct PhaseStateMachine {
    config: PhaseConfig,
}

impl PhaseStateMachine {
    /// Load the durable phase state, creating the initial-phase default on
    /// first run.
    pub async fn load(store: &StateStore, total_estimated_items: u64) -> Result<Self> {
        let config = match store
            .load_phase_config()
            .await
            .context("loading phase config")?
        {
            Some(config) => config,
            None => {
                let config = PhaseConfig::new(total_estimated_items);
                store.save_phase_config(&config).await?;
                info!("phase config initialized (initial phase)");
                config
            }
        };
        Ok(Self { config })
    }

    pub fn config(&self) -> &PhaseConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.config.current_phase
    }

    /// Stamp the start of the very first backfill session; the 30-day
    /// elapsed criterion counts from here.
    pub async fn note_session_start(
        &mut self,
        store: &StateStore,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.config.current_phase == Phase::Initial && self.config.first_session_at.is_none() {
            self.config.first_session_at = Some(now);
            store.save_phase_config(&self.config).await?;
        }
        Ok(())
    }

    /// Fold a finished session into the phase state. Items drained from a
    /// cancelled session are complete ingestions, so cancelled sessions
    /// advance counters just like completed ones; only a failed session
    /// leaves the config untouched. The maintenance stamp is the exception:
    /// a cancelled maintenance pass did not cover the window, so it stays
    /// due.
    pub async fn complete_session(
        &mut self,
        store: &StateStore,
        report: &SessionReport,
    ) -> Result<()> {
        if report.status == SessionStatus::Failed {
            warn!(
                "session {} ended {:?}, phase state unchanged",
                report.session_id, report.status
            );
            return Ok(());
        }

        let now = Utc::now();
        match report.phase {
            Phase::Initial => {
                self.config.initial_items_ingested += u64::from(report.items_downloaded);
                if self.config.transition_due(now) {
                    self.transition(store, now).await?;
                }
            }
            Phase::Maintenance => {
                if report.status.is_complete() {
                    self.config.last_maintenance_at = Some(now);
                }
            }
        }
        store.save_phase_config(&self.config).await?;
        Ok(())
    }

    async fn transition(&mut self, store: &StateStore, now: DateTime<Utc>) -> Result<()> {
        let record = PhaseTransition {
            at: now,
            from: Phase::Initial,
            to: Phase::Maintenance,
            items_ingested: self.config.initial_items_ingested,
        };
        self.config.current_phase = Phase::Maintenance;
        store.append_transition(&record).await?;
        info!(
            "🔁 backfill complete after {} items, switching to maintenance",
            record.items_ingested
        );
        Ok(())
    }
}
