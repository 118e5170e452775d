//! Harvester configuration
//!
//! One explicit configuration object, loaded at engine start and passed to
//! collaborators — never a process-wide singleton mutated mid-run. Settings
//! are grouped by concern: portal access, batch processing, retry policy,
//! per-phase budgets and logging.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

use crate::domain::Phase;
use crate::scheduler::retry::RetryPolicy;

/// Built-in defaults, kept in one place so tests and `Default` impls agree.
pub mod defaults {
    pub const PORTAL_BASE_URL: &str = "https://sjf.example.mx";
    pub const SEARCH_URL_TEMPLATE: &str = "https://sjf.example.mx/busqueda?termino={term}";
    pub const DETAIL_URL_TEMPLATE: &str = "https://sjf.example.mx/detalle/tesis/{id}";
    pub const BODY_WAIT_SECS: u64 = 20;
    pub const DOWNLOAD_TIMEOUT_SECS: u64 = 45;
    pub const NAVIGATIONS_PER_SECOND: u32 = 2;

    pub const BATCH_SIZE: usize = 10;
    pub const WORKER_COUNT: usize = 4;
    pub const BATCH_DELAY_MS: u64 = 2_000;

    pub const INITIAL_MAX_HOURS: f64 = 6.0;
    pub const INITIAL_MAX_ITEMS: u32 = 500;
    pub const MAINTENANCE_MAX_HOURS: f64 = 2.0;
    pub const MAINTENANCE_MAX_ITEMS: u32 = 150;
    pub const TOTAL_ESTIMATED_ITEMS: u64 = 60_000;
    pub const ATTACHMENT_REPAIR_LIMIT: u32 = 25;

    pub const CACHE_MAX_ENTRIES: usize = 1_000;
    pub const SESSION_HISTORY_CAP: usize = 50;

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_FILE_OUTPUT: bool = true;

    /// Broad backfill coverage across the major legal areas.
    pub const INITIAL_SEARCH_TERMS: &[&str] = &[
        "amparo",
        "derechos humanos",
        "constitucional",
        "penal",
        "civil",
        "laboral",
        "administrativo",
        "fiscal",
        "mercantil",
        "familiar",
    ];

    /// Narrow list biased toward recently published material.
    pub const MAINTENANCE_SEARCH_TERMS: &[&str] = &[
        "jurisprudencia",
        "tesis aislada",
        "amparo directo en revisión",
    ];
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvesterConfig {
    pub portal: PortalConfig,
    pub batch: BatchSettings,
    pub retry: RetryPolicy,
    pub phases: PhaseSettings,
    pub logging: LoggingConfig,
    /// Cap on the processed-URL cache; the oldest half is truncated past it.
    pub cache_max_entries: usize,
    pub session_history_cap: usize,
    /// Target folder in object storage for uploaded attachments.
    pub storage_folder_id: Option<String>,
}

/// How to reach the search portal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalConfig {
    pub base_url: String,
    /// `{term}` is replaced with the url-encoded search term.
    pub search_url_template: String,
    /// `{id}` is replaced with the registry number when the listing element
    /// exposes no direct link.
    pub detail_url_template: String,
    pub body_wait_secs: u64,
    pub download_timeout_secs: u64,
    /// Ceiling on detail-page navigations, independent of worker count.
    pub navigations_per_second: u32,
}

/// Batch scheduler knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub worker_count: usize,
    /// Pause between batches to avoid sustained load on the portal.
    pub batch_delay_ms: u64,
}

/// Search strategy and budget for one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseJobSettings {
    pub search_terms: Vec<String>,
    pub max_hours_per_session: f64,
    pub max_items_per_session: u32,
}

/// Per-phase settings plus the corpus estimate seeding the phase config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSettings {
    pub initial: PhaseJobSettings,
    pub maintenance: PhaseJobSettings,
    pub total_estimated_items: u64,
    /// Per maintenance session, how many attachment-less records to repair.
    pub attachment_repair_limit: u32,
}

impl PhaseSettings {
    pub fn job(&self, phase: Phase) -> &PhaseJobSettings {
        match phase {
            Phase::Initial => &self.initial,
            Phase::Maintenance => &self.maintenance,
        }
    }
}

/// Logging knobs consumed by `infrastructure::logging::init`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// "error" | "warn" | "info" | "debug" | "trace"
    pub level: String,
    pub file_output: bool,
    pub log_dir: Option<PathBuf>,
    /// Module-specific filters, e.g. `sqlx=warn`.
    pub module_filters: Vec<String>,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            portal: PortalConfig::default(),
            batch: BatchSettings::default(),
            retry: RetryPolicy::default(),
            phases: PhaseSettings::default(),
            logging: LoggingConfig::default(),
            cache_max_entries: defaults::CACHE_MAX_ENTRIES,
            session_history_cap: defaults::SESSION_HISTORY_CAP,
            storage_folder_id: None,
        }
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::PORTAL_BASE_URL.to_string(),
            search_url_template: defaults::SEARCH_URL_TEMPLATE.to_string(),
            detail_url_template: defaults::DETAIL_URL_TEMPLATE.to_string(),
            body_wait_secs: defaults::BODY_WAIT_SECS,
            download_timeout_secs: defaults::DOWNLOAD_TIMEOUT_SECS,
            navigations_per_second: defaults::NAVIGATIONS_PER_SECOND,
        }
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: defaults::BATCH_SIZE,
            worker_count: defaults::WORKER_COUNT,
            batch_delay_ms: defaults::BATCH_DELAY_MS,
        }
    }
}

impl Default for PhaseSettings {
    fn default() -> Self {
        Self {
            initial: PhaseJobSettings {
                search_terms: defaults::INITIAL_SEARCH_TERMS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                max_hours_per_session: defaults::INITIAL_MAX_HOURS,
                max_items_per_session: defaults::INITIAL_MAX_ITEMS,
            },
            maintenance: PhaseJobSettings {
                search_terms: defaults::MAINTENANCE_SEARCH_TERMS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                max_hours_per_session: defaults::MAINTENANCE_MAX_HOURS,
                max_items_per_session: defaults::MAINTENANCE_MAX_ITEMS,
            },
            total_estimated_items: defaults::TOTAL_ESTIMATED_ITEMS,
            attachment_repair_limit: defaults::ATTACHMENT_REPAIR_LIMIT,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            file_output: defaults::LOG_FILE_OUTPUT,
            log_dir: None,
            module_filters: vec!["sqlx=warn".to_string()],
        }
    }
}

impl HarvesterConfig {
    /// Load from a JSON file, creating it with defaults on first run.
    pub async fn load_or_default(path: &std::path::Path) -> Result<Self> {
        match fs::read_to_string(path).await {
            Ok(raw) => {
                let config: Self = serde_json::from_str(&raw)
                    .with_context(|| format!("invalid config file {}", path.display()))?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save(path).await?;
                info!("wrote default configuration to {}", path.display());
                Ok(config)
            }
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    pub async fn save(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw)
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.batch.batch_size > 0, "batch_size must be positive");
        anyhow::ensure!(self.batch.worker_count > 0, "worker_count must be positive");
        anyhow::ensure!(
            self.portal.navigations_per_second > 0,
            "navigations_per_second must be positive"
        );
        anyhow::ensure!(
            self.cache_max_entries >= 2,
            "cache_max_entries must allow at least two entries"
        );
        anyhow::ensure!(
            !self.phases.initial.search_terms.is_empty()
                && !self.phases.maintenance.search_terms.is_empty(),
            "each phase needs at least one search term"
        );
        anyhow::ensure!(
            self.portal.search_url_template.contains("{term}"),
            "search_url_template must contain {{term}}"
        );
        anyhow::ensure!(
            self.portal.detail_url_template.contains("{id}"),
            "detail_url_template must contain {{id}}"
        );
        Ok(())
    }

    /// Default location for the config file, under the platform data dir.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lex-harvest")
            .join("config.json")
    }
}
