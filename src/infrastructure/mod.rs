//! Infrastructure: collaborator interfaces and durable state
//!
//! The browser driver, object storage and relational persistence are external
//! collaborators consumed through narrow async traits; the engine never
//! implements rendering, uploads or SQL semantics beyond its own schema.

pub mod browser;
pub mod config;
pub mod logging;
pub mod repository;
pub mod state_store;
pub mod storage;

pub use browser::{BrowserDriver, DriverError, ElementHandle, ElementQuery};
pub use config::HarvesterConfig;
pub use repository::{PersistError, RecordRepository, SqliteRecordRepository, UpsertOutcome};
pub use state_store::StateStore;
pub use storage::{ObjectStorage, StorageError, StoredObject};
