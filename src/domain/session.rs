//! Session lifecycle types
//!
//! A `SessionReport` records one bounded execution of a phase job: when it
//! ran, under which phase, and the four outcome counters. Reports are
//! finalized at job end (including abnormal termination) and appended to the
//! durable session history so status reads survive a crash mid-session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::phase::Phase;

/// Terminal state of a harvesting session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Running,
    Completed,
    /// Operator stop or budget exhaustion; in-flight items were drained.
    Cancelled,
    /// Setup failure or unrecoverable session-level error.
    Failed,
}

impl SessionStatus {
    /// Incomplete sessions are reported distinctly from completed ones.
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Finalized (or in-flight) counters for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub phase: Phase,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Summaries that survived minimal-field extraction.
    pub items_found: u32,
    /// Items fully ingested including their attachment.
    pub items_downloaded: u32,
    /// Items short-circuited by the dedup gate (store hit or cache hit).
    pub duplicates: u32,
    /// Items abandoned after retry exhaustion or setup failure.
    pub errors: u32,
}

impl SessionReport {
    pub fn begin(phase: Phase) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            phase,
            status: SessionStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            items_found: 0,
            items_downloaded: 0,
            duplicates: 0,
            errors: 0,
        }
    }

    pub fn finalize(&mut self, status: SessionStatus) {
        self.status = status;
        self.ended_at = Some(Utc::now());
    }

    /// One-line human-facing summary, logged at session end.
    pub fn summary_line(&self) -> String {
        format!(
            "session {} [{}] {:?}: found={} downloaded={} duplicates={} errors={}",
            self.session_id,
            self.phase,
            self.status,
            self.items_found,
            self.items_downloaded,
            self.duplicates,
            self.errors
        )
    }
}
