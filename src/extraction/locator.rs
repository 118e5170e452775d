//! Ordered-fallback field resolution
//!
//! Every semantic field carries an ordered list of lookup strategies:
//! structured CSS queries first, most specific to least specific, then a
//! free-text pattern over the element's rendered text. Strategies are tried
//! strictly in order and the first non-empty, shape-valid result wins — no
//! scoring, no merging. A field none of the strategies can resolve is
//! reported as unresolved; callers skip rather than fabricate.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::ExtractError;

/// Semantic fields the extractor asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SemanticField {
    Identifier,
    Title,
    DetailUrl,
    MetadataBlock,
    Heading,
    FullText,
    PrecedentText,
    AttachmentUrl,
}

impl SemanticField {
    pub fn name(self) -> &'static str {
        match self {
            Self::Identifier => "identifier",
            Self::Title => "title",
            Self::DetailUrl => "detail_url",
            Self::MetadataBlock => "metadata_block",
            Self::Heading => "heading",
            Self::FullText => "full_text",
            Self::PrecedentText => "precedent_text",
            Self::AttachmentUrl => "attachment_url",
        }
    }
}

/// One way of finding a field's value in a page element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LocatorStrategy {
    /// CSS query; value is the matched element's trimmed text.
    StructuredQuery { selector: String },
    /// CSS query; value is the named attribute of the first match.
    AttributeQuery { selector: String, attribute: String },
    /// Regex over the root element's rendered text; value is capture group 1
    /// when present, the whole match otherwise.
    TextPattern { pattern: String },
}

/// Per-field ordered strategy lists, serializable so operators can adjust
/// selectors without a rebuild when the portal markup drifts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorConfig {
    pub identifier: Vec<LocatorStrategy>,
    pub title: Vec<LocatorStrategy>,
    pub detail_url: Vec<LocatorStrategy>,
    pub metadata_block: Vec<LocatorStrategy>,
    pub heading: Vec<LocatorStrategy>,
    pub full_text: Vec<LocatorStrategy>,
    pub precedent_text: Vec<LocatorStrategy>,
    pub attachment_url: Vec<LocatorStrategy>,
}

fn css(selector: &str) -> LocatorStrategy {
    LocatorStrategy::StructuredQuery {
        selector: selector.to_string(),
    }
}

fn attr(selector: &str, attribute: &str) -> LocatorStrategy {
    LocatorStrategy::AttributeQuery {
        selector: selector.to_string(),
        attribute: attribute.to_string(),
    }
}

fn pattern(pattern: &str) -> LocatorStrategy {
    LocatorStrategy::TextPattern {
        pattern: pattern.to_string(),
    }
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            identifier: vec![
                css("span.registro-digital"),
                css("span[id*='registro']"),
                attr("a[data-registro]", "data-registro"),
                // Registry numbers are 6+ digit runs.
                pattern(r"\b(\d{6,})\b"),
            ],
            title: vec![
                css("div.rubro"),
                css("h3.titulo-tesis"),
                css("td.rubro"),
                // Thesis headings render as long all-caps lines.
                pattern(r"(?m)^([A-ZÁÉÍÓÚÜÑ][A-ZÁÉÍÓÚÜÑ0-9 ,.;:()\-]{19,})$"),
            ],
            detail_url: vec![
                attr("a[href*='/detalle/tesis/']", "href"),
                attr("a[href*='tesis']", "href"),
            ],
            metadata_block: vec![
                css("div.datos-localizacion"),
                css("span.metadatos"),
                css("td.localizacion"),
                // Localization lines are semicolon-delimited with 4+ parts.
                pattern(r"([^;\n]+;[^;\n]+;[^;\n]+;[^\n]+)"),
            ],
            heading: vec![css("h1.rubro"), css("div.detalle-rubro"), css("h1")],
            full_text: vec![
                css("div.texto-tesis"),
                css("div#texto"),
                css("article.contenido-tesis"),
            ],
            precedent_text: vec![
                css("div.precedentes"),
                css("div#precedentes"),
                css("section.seccion-precedentes"),
            ],
            attachment_url: vec![
                attr("a[href$='.pdf']", "href"),
                attr("a.enlace-descarga", "href"),
            ],
        }
    }
}

impl LocatorConfig {
    fn fields(&self) -> [(SemanticField, &Vec<LocatorStrategy>); 8] {
        [
            (SemanticField::Identifier, &self.identifier),
            (SemanticField::Title, &self.title),
            (SemanticField::DetailUrl, &self.detail_url),
            (SemanticField::MetadataBlock, &self.metadata_block),
            (SemanticField::Heading, &self.heading),
            (SemanticField::FullText, &self.full_text),
            (SemanticField::PrecedentText, &self.precedent_text),
            (SemanticField::AttachmentUrl, &self.attachment_url),
        ]
    }
}

/// A resolved field value plus which strategy produced it (for logging and
/// for proving fallback order in tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    pub value: String,
    pub strategy_index: usize,
}

enum Compiled {
    Query {
        selector: Selector,
    },
    Attribute {
        selector: Selector,
        attribute: String,
    },
    Pattern {
        regex: Regex,
    },
}

/// One rejected strategy; the kind decides which error a fully unusable
/// field reports.
struct CompileFailure {
    reason: String,
    is_pattern: bool,
}

impl CompileFailure {
    fn selector(reason: String) -> Self {
        Self {
            reason,
            is_pattern: false,
        }
    }

    fn pattern(reason: String) -> Self {
        Self {
            reason,
            is_pattern: true,
        }
    }
}

/// Compiled per-field strategy table.
pub struct LocatorTable {
    strategies: HashMap<SemanticField, Vec<Compiled>>,
}

impl LocatorTable {
    /// Compile every configured strategy. Individual bad selectors are
    /// skipped with a warning, matching how a drifting config should degrade;
    /// a field left with zero usable strategies is a hard error.
    pub fn from_config(config: &LocatorConfig) -> Result<Self, ExtractError> {
        let mut strategies = HashMap::new();

        for (field, specs) in config.fields() {
            let mut compiled = Vec::new();
            let mut failures = Vec::new();

            for spec in specs {
                match Self::compile(spec) {
                    Ok(c) => compiled.push(c),
                    Err(failure) => {
                        warn!("skipping bad locator for {}: {}", field.name(), failure.reason);
                        failures.push(failure);
                    }
                }
            }

            if compiled.is_empty() {
                let reasons = failures
                    .iter()
                    .map(|f| f.reason.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                let all_patterns =
                    !failures.is_empty() && failures.iter().all(|f| f.is_pattern);
                return Err(if all_patterns {
                    ExtractError::PatternCompile {
                        field: field.name().to_string(),
                        reason: reasons,
                    }
                } else {
                    ExtractError::SelectorCompile {
                        field: field.name().to_string(),
                        reasons,
                    }
                });
            }
            strategies.insert(field, compiled);
        }

        Ok(Self { strategies })
    }

    fn compile(spec: &LocatorStrategy) -> Result<Compiled, CompileFailure> {
        match spec {
            LocatorStrategy::StructuredQuery { selector } => Selector::parse(selector)
                .map(|selector| Compiled::Query { selector })
                .map_err(|e| CompileFailure::selector(format!("'{selector}': {e}"))),
            LocatorStrategy::AttributeQuery {
                selector,
                attribute,
            } => Selector::parse(selector)
                .map(|selector| Compiled::Attribute {
                    selector,
                    attribute: attribute.clone(),
                })
                .map_err(|e| CompileFailure::selector(format!("'{selector}': {e}"))),
            LocatorStrategy::TextPattern { pattern } => Regex::new(pattern)
                .map(|regex| Compiled::Pattern { regex })
                .map_err(|e| CompileFailure::pattern(format!("/{pattern}/: {e}"))),
        }
    }

    /// Resolve `field` within the given subtree. Strategies run in configured
    /// order; the first non-empty, shape-valid value wins.
    pub fn resolve(&self, field: SemanticField, root: ElementRef<'_>) -> Option<ResolvedField> {
        let compiled = self.strategies.get(&field)?;

        for (index, strategy) in compiled.iter().enumerate() {
            let candidate = match strategy {
                Compiled::Query { selector } => root
                    .select(selector)
                    .next()
                    .map(|el| el.text().collect::<String>().trim().to_string()),
                Compiled::Attribute {
                    selector,
                    attribute,
                } => root
                    .select(selector)
                    .next()
                    .and_then(|el| el.value().attr(attribute))
                    .map(|v| v.trim().to_string()),
                Compiled::Pattern { regex } => {
                    let text = root.text().collect::<String>();
                    regex.captures(&text).map(|caps| {
                        caps.get(1)
                            .unwrap_or_else(|| caps.get(0).expect("match exists"))
                            .as_str()
                            .trim()
                            .to_string()
                    })
                }
            };

            match candidate {
                Some(value) if !value.is_empty() && shape_valid(field, &value) => {
                    debug!(
                        "resolved {} via strategy {}: {:.60}",
                        field.name(),
                        index,
                        value
                    );
                    return Some(ResolvedField {
                        value,
                        strategy_index: index,
                    });
                }
                _ => continue,
            }
        }

        debug!("no strategy resolved {}", field.name());
        None
    }
}

static IDENTIFIER_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{6,}").expect("static regex"));

/// Cheap per-field plausibility check applied before a strategy's result is
/// accepted; an implausible value falls through to the next strategy.
fn shape_valid(field: SemanticField, value: &str) -> bool {
    match field {
        SemanticField::Identifier => IDENTIFIER_SHAPE.is_match(value),
        SemanticField::DetailUrl | SemanticField::AttachmentUrl => {
            value.starts_with("http") || value.starts_with('/')
        }
        SemanticField::Title | SemanticField::Heading => value.len() >= 4,
        _ => true,
    }
}
