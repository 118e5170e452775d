//! Thesis data model: extraction outputs and the durable record
//!
//! `ThesisSummary` is produced per search-result element and lives only for
//! one listing pass. `ThesisDetail` is produced on demand when a detail page
//! is fetched. `ThesisRecord` is the durable entity keyed by the portal's
//! registry number (`external_id`); it is created exactly once and later
//! mutations only ever add the attachment fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Semi-structured summary extracted from one search-result element.
///
/// Unique only within a single listing pass. Summaries whose `external_id`
/// could not be resolved are discarded by the extractor before they reach
/// the dedup gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThesisSummary {
    /// Registry number assigned by the portal (globally unique upstream).
    pub external_id: String,
    pub title: String,
    pub detail_url: String,
    /// Raw semicolon-delimited localization line, kept verbatim for audit.
    pub raw_metadata_text: String,
    /// Positionally parsed metadata; `None` when the raw text had fewer than
    /// four delimited parts (fail-closed, never partially populated).
    pub metadata: Option<ThesisMetadata>,
}

/// Positional metadata parsed from the localization line:
/// `organ; epoch; publication; number[; doc_type; publication_date]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThesisMetadata {
    pub organ: String,
    pub epoch: String,
    pub publication: String,
    pub number: String,
    pub doc_type: Option<String>,
    pub publication_date: Option<String>,
}

/// Body fields extracted from a thesis detail page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThesisDetail {
    pub detail_url: String,
    pub heading: String,
    pub full_text: String,
    pub precedent_text: String,
    /// Direct attachment link when the page exposes one; the fetcher falls
    /// back to clicking a download affordance when this is absent.
    pub attachment_url: Option<String>,
    pub raw_markup: String,
}

/// Durable ingested thesis, keyed by `external_id`.
///
/// Owned exclusively by the ingest adapter. Never deleted by the engine;
/// `attachment_object_id`/`attachment_link` may be added after creation but
/// existing values are never overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThesisRecord {
    pub external_id: String,
    pub title: String,
    pub detail_url: String,
    pub heading: String,
    pub full_text: String,
    pub precedent_text: String,
    pub attachment_object_id: Option<String>,
    pub attachment_link: Option<String>,
    pub ingested_at: DateTime<Utc>,
    pub processed: bool,
    pub analyzed: bool,
}

impl ThesisRecord {
    /// Assemble a record from a listing summary and its fetched detail.
    pub fn from_parts(summary: &ThesisSummary, detail: &ThesisDetail) -> Self {
        Self {
            external_id: summary.external_id.clone(),
            title: summary.title.clone(),
            detail_url: summary.detail_url.clone(),
            heading: detail.heading.clone(),
            full_text: detail.full_text.clone(),
            precedent_text: detail.precedent_text.clone(),
            attachment_object_id: None,
            attachment_link: None,
            ingested_at: Utc::now(),
            processed: true,
            analyzed: false,
        }
    }

    pub fn has_attachment(&self) -> bool {
        self.attachment_object_id.is_some()
    }
}
