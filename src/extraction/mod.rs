//! HTML extraction layer
//!
//! The locator resolver owns an ordered strategy list per semantic field and
//! is the engine's resilience mechanism against markup drift; the field
//! extractor composes resolved fields into summaries and details. Both are
//! pure over parsed markup — no network, no driver.

pub mod extractor;
pub mod locator;

use thiserror::Error;

pub use extractor::{ExtractorConfig, FieldExtractor};
pub use locator::{LocatorConfig, LocatorStrategy, LocatorTable, ResolvedField, SemanticField};

#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    #[error("no valid selector compiled for field '{field}': {reasons}")]
    SelectorCompile { field: String, reasons: String },

    #[error("invalid text pattern for field '{field}': {reason}")]
    PatternCompile { field: String, reason: String },
}
