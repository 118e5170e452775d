//! Field extractor: raw page elements to semi-structured records
//!
//! Every leaf lookup goes through the locator table. Summaries missing their
//! registry number are dropped (logged, never retried within the pass) and
//! the localization metadata split is fail-closed: fewer than four delimited
//! parts yields no metadata at all rather than misaligned fields.
//!
//! The API takes raw HTML strings and returns owned values so callers never
//! hold a parsed document across an await point.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::locator::{LocatorConfig, LocatorTable, SemanticField};
use super::ExtractError;
use crate::domain::{ThesisDetail, ThesisMetadata, ThesisSummary};
use crate::infrastructure::config::PortalConfig;

/// Extraction configuration: result-container fallbacks plus the per-field
/// locator table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Tried in order; the first selector yielding any elements wins.
    pub result_container: Vec<String>,
    pub locators: LocatorConfig,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            result_container: vec![
                "div.resultado-tesis".to_string(),
                "li.item-resultado".to_string(),
                "div.lista-resultados article".to_string(),
                "tr.fila-resultado".to_string(),
            ],
            locators: LocatorConfig::default(),
        }
    }
}

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{6,}").expect("static regex"));

/// Turns raw search-result elements and detail pages into domain values.
pub struct FieldExtractor {
    container_selectors: Vec<Selector>,
    locators: LocatorTable,
    base_url: String,
    detail_url_template: String,
}

impl FieldExtractor {
    pub fn new(config: &ExtractorConfig, portal: &PortalConfig) -> Result<Self, ExtractError> {
        let mut container_selectors = Vec::new();
        let mut failures = Vec::new();
        for raw in &config.result_container {
            match Selector::parse(raw) {
                Ok(selector) => container_selectors.push(selector),
                Err(e) => {
                    warn!("skipping bad container selector '{}': {}", raw, e);
                    failures.push(format!("'{raw}': {e}"));
                }
            }
        }
        if container_selectors.is_empty() {
            return Err(ExtractError::SelectorCompile {
                field: "result_container".to_string(),
                reasons: failures.join(", "),
            });
        }

        Ok(Self {
            container_selectors,
            locators: LocatorTable::from_config(&config.locators)?,
            base_url: portal.base_url.clone(),
            detail_url_template: portal.detail_url_template.clone(),
        })
    }

    /// Extract all summaries from one search-results page. Elements failing
    /// minimal-field extraction are dropped and do not abort the pass.
    pub fn extract_summaries(&self, html: &str) -> Vec<ThesisSummary> {
        let document = Html::parse_document(html);

        for selector in &self.container_selectors {
            let elements: Vec<ElementRef<'_>> = document.select(selector).collect();
            if elements.is_empty() {
                continue;
            }
            debug!("found {} result elements", elements.len());

            let mut summaries = Vec::new();
            for (index, element) in elements.iter().enumerate() {
                match self.extract_summary(*element) {
                    Some(summary) => summaries.push(summary),
                    None => debug!("dropping result element {} (minimal fields missing)", index),
                }
            }
            return summaries;
        }

        warn!("no result container matched; page yielded nothing");
        Vec::new()
    }

    /// Extract one summary. Requires at minimum an identifier or a title to
    /// consider the element a result at all; summaries without a resolvable
    /// identifier are then discarded because the registry number is the
    /// dedup key.
    pub fn extract_summary(&self, element: ElementRef<'_>) -> Option<ThesisSummary> {
        let identifier = self
            .locators
            .resolve(SemanticField::Identifier, element)
            .and_then(|r| DIGIT_RUN.find(&r.value).map(|m| m.as_str().to_string()));
        let title = self
            .locators
            .resolve(SemanticField::Title, element)
            .map(|r| r.value);

        let external_id = match (&identifier, &title) {
            (None, None) => return None,
            (None, Some(title)) => {
                warn!(
                    "result '{:.60}' has no registry number, discarding",
                    title
                );
                return None;
            }
            (Some(id), _) => id.clone(),
        };

        let detail_url = match self.locators.resolve(SemanticField::DetailUrl, element) {
            Some(resolved) => self.absolutize(&resolved.value),
            // Documented fallback: the portal's detail URLs are addressable
            // by registry number, so synthesize from the template.
            None => self.detail_url_template.replace("{id}", &external_id),
        };

        let raw_metadata_text = self
            .locators
            .resolve(SemanticField::MetadataBlock, element)
            .map(|r| r.value)
            .unwrap_or_default();
        let metadata = parse_metadata(&raw_metadata_text);

        Some(ThesisSummary {
            external_id,
            title: title.unwrap_or_default(),
            detail_url,
            raw_metadata_text,
            metadata,
        })
    }

    /// Extract detail-page body fields. Heading and full text are the
    /// minimum for a useful record; missing either drops the page.
    pub fn extract_detail(&self, html: &str, detail_url: &str) -> Option<ThesisDetail> {
        let document = Html::parse_document(html);
        let root = document.root_element();

        let heading = self.locators.resolve(SemanticField::Heading, root)?.value;
        let full_text = self.locators.resolve(SemanticField::FullText, root)?.value;
        let precedent_text = self
            .locators
            .resolve(SemanticField::PrecedentText, root)
            .map(|r| r.value)
            .unwrap_or_default();
        let attachment_url = self
            .locators
            .resolve(SemanticField::AttachmentUrl, root)
            .map(|r| self.absolutize(&r.value));

        Some(ThesisDetail {
            detail_url: detail_url.to_string(),
            heading,
            full_text,
            precedent_text,
            attachment_url,
            raw_markup: html.to_string(),
        })
    }

    /// Resolve a possibly-relative href against the portal base URL.
    fn absolutize(&self, href: &str) -> String {
        if href.starts_with("http") {
            return href.to_string();
        }
        match Url::parse(&self.base_url).and_then(|base| base.join(href)) {
            Ok(joined) => joined.to_string(),
            Err(e) => {
                warn!("could not resolve '{}' against base: {}", href, e);
                format!(
                    "{}/{}",
                    self.base_url.trim_end_matches('/'),
                    href.trim_start_matches('/')
                )
            }
        }
    }
}

/// Positional split of the localization line:
/// `organ; epoch; publication; number[; doc_type; publication_date]`.
///
/// Fewer than four parts returns `None` — fail-closed, misaligned fields are
/// worse than absent ones. Preserves the upstream fragility exactly: the
/// delimiter is not escapable, a literal `;` inside a value misaligns the
/// split upstream and here alike.
pub fn parse_metadata(raw: &str) -> Option<ThesisMetadata> {
    let parts: Vec<&str> = raw.split(';').map(str::trim).collect();
    if parts.len() < 4 || parts.iter().take(4).any(|p| p.is_empty()) {
        return None;
    }

    Some(ThesisMetadata {
        organ: parts[0].to_string(),
        epoch: parts[1].to_string(),
        publication: parts[2].to_string(),
        number: parts[3].to_string(),
        doc_type: parts.get(4).filter(|p| !p.is_empty()).map(|p| p.to_string()),
        publication_date: parts.get(5).filter(|p| !p.is_empty()).map(|p| p.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> FieldExtractor {
        FieldExtractor::new(&ExtractorConfig::default(), &PortalConfig::default()).unwrap()
    }

    const RESULT_OK: &str = r#"
        <div class="resultado-tesis">
            <span class="registro-digital">2029876</span>
            <div class="rubro">AMPARO INDIRECTO. SUPUESTOS DE PROCEDENCIA DEL JUICIO.</div>
            <a href="/detalle/tesis/2029876">ver</a>
            <div class="datos-localizacion">Primera Sala; Undécima Época; Gaceta del Semanario; 1a./J. 10/2024; Jurisprudencia; 2024-03-15</div>
        </div>"#;

    #[test]
    fn extracts_complete_summary() {
        let html = format!("<html><body>{RESULT_OK}</body></html>");
        let summaries = extractor().extract_summaries(&html);
        assert_eq!(summaries.len(), 1);

        let s = &summaries[0];
        assert_eq!(s.external_id, "2029876");
        assert!(s.title.starts_with("AMPARO INDIRECTO"));
        assert_eq!(s.detail_url, "https://sjf.example.mx/detalle/tesis/2029876");

        let meta = s.metadata.as_ref().unwrap();
        assert_eq!(meta.organ, "Primera Sala");
        assert_eq!(meta.epoch, "Undécima Época");
        assert_eq!(meta.number, "1a./J. 10/2024");
        assert_eq!(meta.doc_type.as_deref(), Some("Jurisprudencia"));
        assert_eq!(meta.publication_date.as_deref(), Some("2024-03-15"));
    }

    #[test]
    fn synthesizes_detail_url_from_identifier() {
        let html = r#"<html><body>
            <div class="resultado-tesis">
                <span class="registro-digital">2031111</span>
                <div class="rubro">DERECHOS HUMANOS. CONTROL DE CONVENCIONALIDAD.</div>
            </div>
        </body></html>"#;
        let summaries = extractor().extract_summaries(html);
        assert_eq!(summaries.len(), 1);
        assert_eq!(
            summaries[0].detail_url,
            "https://sjf.example.mx/detalle/tesis/2031111"
        );
    }

    #[test]
    fn element_without_identifier_or_title_is_dropped() {
        let html = r#"<html><body>
            <div class="resultado-tesis"><p>publicidad</p></div>
        </body></html>"#;
        assert!(extractor().extract_summaries(html).is_empty());
    }

    #[test]
    fn element_with_title_but_no_identifier_is_discarded() {
        let html = r#"<html><body>
            <div class="resultado-tesis">
                <div class="rubro">TESIS SIN REGISTRO VISIBLE EN EL LISTADO.</div>
            </div>
        </body></html>"#;
        assert!(extractor().extract_summaries(html).is_empty());
    }

    #[test]
    fn metadata_with_three_parts_is_fail_closed() {
        assert!(parse_metadata("Primera Sala; Undécima Época; Gaceta").is_none());
    }

    #[test]
    fn metadata_with_four_parts_leaves_optionals_empty() {
        let meta = parse_metadata("Pleno; Novena Época; Semanario; P./J. 5/2009").unwrap();
        assert_eq!(meta.organ, "Pleno");
        assert!(meta.doc_type.is_none());
        assert!(meta.publication_date.is_none());
    }

    #[test]
    fn metadata_empty_string_is_none() {
        assert!(parse_metadata("").is_none());
        assert!(parse_metadata(";;;").is_none());
    }

    #[test]
    fn extract_detail_requires_heading_and_text() {
        let ex = extractor();
        let complete = r#"<html><body>
            <h1 class="rubro">AMPARO DIRECTO. PLAZO.</h1>
            <div class="texto-tesis">El plazo para promover...</div>
            <div class="precedentes">Amparo directo 123/2023...</div>
            <a href="/descargas/2029876.pdf" class="enlace-descarga">PDF</a>
        </body></html>"#;
        let detail = ex
            .extract_detail(complete, "https://sjf.example.mx/detalle/tesis/2029876")
            .unwrap();
        assert_eq!(detail.heading, "AMPARO DIRECTO. PLAZO.");
        assert_eq!(
            detail.attachment_url.as_deref(),
            Some("https://sjf.example.mx/descargas/2029876.pdf")
        );

        let missing_text = r#"<html><body><h1 class="rubro">SOLO RUBRO.</h1></body></html>"#;
        assert!(ex.extract_detail(missing_text, "u").is_none());
    }

    #[test]
    fn container_fallback_order_is_respected() {
        // Only the second container selector matches.
        let html = r#"<html><body>
            <li class="item-resultado">
                <span class="registro-digital">2040404</span>
                <div class="rubro">COMPETENCIA ECONÓMICA. MULTAS.</div>
            </li>
        </body></html>"#;
        let summaries = extractor().extract_summaries(html);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].external_id, "2040404");
    }
}
