//! Core domain types for the harvesting engine
//!
//! Ephemeral extraction outputs (`ThesisSummary`, `ThesisDetail`), the durable
//! `ThesisRecord`, session bookkeeping and phase configuration live here.
//! No I/O in this module tree.

pub mod phase;
pub mod session;
pub mod thesis;

pub use phase::{Phase, PhaseConfig, PhaseTransition};
pub use session::{SessionReport, SessionStatus};
pub use thesis::{ThesisDetail, ThesisMetadata, ThesisRecord, ThesisSummary};
