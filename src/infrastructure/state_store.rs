//! Durable JSON state store
//!
//! Small JSON-shaped blobs with a load-at-start / save-at-end lifecycle:
//! the phase configuration singleton, the bounded processed-URL cache, the
//! capped session history and the cumulative counters. Phase transitions go
//! to an append-only JSON-lines log for audit. Writes go through a temp file
//! plus rename so a crash mid-save never leaves a torn blob.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::domain::{PhaseConfig, PhaseTransition, SessionReport};

const PHASE_CONFIG_FILE: &str = "phase_config.json";
const URL_CACHE_FILE: &str = "processed_urls.json";
const SESSION_HISTORY_FILE: &str = "session_history.json";
const CUMULATIVE_STATS_FILE: &str = "cumulative_stats.json";
const TRANSITION_LOG_FILE: &str = "transitions.jsonl";

/// File-backed store rooted at one state directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create state dir {}", self.dir.display()))
    }

    async fn read_blob<T: DeserializeOwned>(&self, file: &str) -> Result<Option<T>> {
        let path = self.dir.join(file);
        match fs::read_to_string(&path).await {
            Ok(raw) => {
                let value = serde_json::from_str(&raw)
                    .with_context(|| format!("corrupt state blob {}", path.display()))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    async fn write_blob<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        self.ensure_dir().await?;
        let path = self.dir.join(file);
        let tmp = self.dir.join(format!("{file}.tmp"));
        let raw = serde_json::to_string_pretty(value)?;
        fs::write(&tmp, raw)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to replace {}", path.display()))?;
        debug!("saved state blob {}", path.display());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase configuration
    // ------------------------------------------------------------------

    pub async fn load_phase_config(&self) -> Result<Option<PhaseConfig>> {
        self.read_blob(PHASE_CONFIG_FILE).await
    }

    pub async fn save_phase_config(&self, config: &PhaseConfig) -> Result<()> {
        self.write_blob(PHASE_CONFIG_FILE, config).await
    }

    // ------------------------------------------------------------------
    // Processed-URL cache (opaque to the store; the gate owns the type)
    // ------------------------------------------------------------------

    pub async fn load_url_cache<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.read_blob(URL_CACHE_FILE).await
    }

    pub async fn save_url_cache<T: Serialize>(&self, cache: &T) -> Result<()> {
        self.write_blob(URL_CACHE_FILE, cache).await
    }

    // ------------------------------------------------------------------
    // Session history, capped at the most recent N entries
    // ------------------------------------------------------------------

    pub async fn load_session_history(&self) -> Result<Vec<SessionReport>> {
        Ok(self.read_blob(SESSION_HISTORY_FILE).await?.unwrap_or_default())
    }

    pub async fn push_session_report(&self, report: &SessionReport, cap: usize) -> Result<()> {
        let mut history = self.load_session_history().await?;
        history.push(report.clone());
        if history.len() > cap {
            let drop = history.len() - cap;
            history.drain(..drop);
        }
        self.write_blob(SESSION_HISTORY_FILE, &history).await
    }

    // ------------------------------------------------------------------
    // Cumulative counters (day-keyed; the stats module owns the type)
    // ------------------------------------------------------------------

    pub async fn load_cumulative<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.read_blob(CUMULATIVE_STATS_FILE).await
    }

    pub async fn save_cumulative<T: Serialize>(&self, stats: &T) -> Result<()> {
        self.write_blob(CUMULATIVE_STATS_FILE, stats).await
    }

    // ------------------------------------------------------------------
    // Transition audit log (append-only)
    // ------------------------------------------------------------------

    pub async fn append_transition(&self, transition: &PhaseTransition) -> Result<()> {
        self.ensure_dir().await?;
        let path = self.dir.join(TRANSITION_LOG_FILE);
        let mut line = serde_json::to_string(transition)?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        info!(
            "📜 phase transition recorded: {} -> {} ({} items)",
            transition.from, transition.to, transition.items_ingested
        );
        Ok(())
    }

    pub async fn read_transitions(&self) -> Result<Vec<PhaseTransition>> {
        let path = self.dir.join(TRANSITION_LOG_FILE);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
        };

        let mut transitions = Vec::new();
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            transitions.push(
                serde_json::from_str(line)
                    .with_context(|| format!("corrupt transition entry: {line}"))?,
            );
        }
        Ok(transitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Phase, SessionStatus};
    use chrono::Utc;

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn phase_config_round_trips() {
        let (_dir, store) = store();
        assert!(store.load_phase_config().await.unwrap().is_none());

        let config = PhaseConfig::new(5000);
        store.save_phase_config(&config).await.unwrap();
        let loaded = store.load_phase_config().await.unwrap().unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn session_history_is_capped_oldest_first() {
        let (_dir, store) = store();
        for _ in 0..5 {
            let mut report = SessionReport::begin(Phase::Initial);
            report.finalize(SessionStatus::Completed);
            store.push_session_report(&report, 3).await.unwrap();
        }
        let history = store.load_session_history().await.unwrap();
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn transition_log_appends_in_order() {
        let (_dir, store) = store();
        for items in [100u64, 250] {
            store
                .append_transition(&PhaseTransition {
                    at: Utc::now(),
                    from: Phase::Initial,
                    to: Phase::Maintenance,
                    items_ingested: items,
                })
                .await
                .unwrap();
        }
        let transitions = store.read_transitions().await.unwrap();
        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[0].items_ingested, 100);
        assert_eq!(transitions[1].items_ingested, 250);
    }
}
