//! lex-harvest: unattended harvesting of legal thesis records
//!
//! Orchestrates a JavaScript-rendered court search portal behind a browser
//! driver: discover search results, extract semi-structured summaries via
//! ordered-fallback locators, ingest each thesis at most once, upload its
//! attachment and account for everything in durable session state. The
//! engine runs through two regimes, a bounded daily backfill and a weekly
//! maintenance refresh, with a one-way transition between them.
//!
//! Browser automation, relational persistence and object storage enter
//! through traits (`BrowserDriver`, `RecordRepository`, `ObjectStorage`);
//! the concrete bindings live outside this crate.

pub mod domain;
pub mod engine;
pub mod extraction;
pub mod fetcher;
pub mod gate;
pub mod infrastructure;
pub mod persist;
pub mod phase_machine;
pub mod pipeline;
pub mod scheduler;
pub mod stats;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use domain::{
    Phase, PhaseConfig, PhaseTransition, SessionReport, SessionStatus, ThesisDetail,
    ThesisMetadata, ThesisRecord, ThesisSummary,
};
pub use engine::HarvestEngine;
pub use extraction::{ExtractorConfig, FieldExtractor};
pub use infrastructure::browser::{BrowserDriver, DriverError, ElementHandle, ElementQuery};
pub use infrastructure::config::HarvesterConfig;
pub use infrastructure::repository::{RecordRepository, SqliteRecordRepository, UpsertOutcome};
pub use infrastructure::state_store::StateStore;
pub use infrastructure::storage::{ObjectStorage, StorageError, StoredObject};
pub use stats::StatusReport;
