//! Citation matching against reference texts.
//!
//! Every citation in the response must fuzzily appear in at least one of the
//! reference texts supplied through the context. Matching uses
//! [`fuzzy::partial_ratio`](crate::fuzzy::partial_ratio), so a citation that
//! quotes part of a longer passage still scores 100.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::context::ValidationContext;
use crate::fuzzy::partial_ratio;
use crate::result::ValidationResult;
use crate::strategy::{parse_params, StrategyError, StrategyFactory, ValidationStrategy};

use super::lookup;

const KIND: &str = "citation";

/// Score a citation must reach to count as matched.
pub const DEFAULT_MIN_SCORE: f64 = 80.0;

/// Unmatched citation text is truncated to this many characters in debug info.
pub const MAX_CITATION_TEXT: usize = 100;

#[derive(Debug, Clone)]
pub struct CitationValidator {
    name: String,
    min_score: f64,
    citations_field: String,
}

impl CitationValidator {
    /// `min_score` must lie in `0..=100`.
    pub fn new(name: impl Into<String>, min_score: f64) -> Result<Self, StrategyError> {
        if !(0.0..=100.0).contains(&min_score) {
            return Err(StrategyError::invalid_config(
                KIND,
                format!("min_score must be between 0 and 100, got {min_score}"),
            ));
        }
        Ok(Self {
            name: name.into(),
            min_score,
            citations_field: default_citations_field(),
        })
    }

    /// Read citations from a different response field.
    pub fn citations_field(mut self, field: impl Into<String>) -> Self {
        self.citations_field = field.into();
        self
    }

    pub fn min_score(&self) -> f64 {
        self.min_score
    }

    fn best_score(citation: &str, references: &[&str]) -> f64 {
        references
            .iter()
            .map(|reference| partial_ratio(citation, reference))
            .fold(0.0, f64::max)
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_CITATION_TEXT {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(MAX_CITATION_TEXT).collect();
    cut.push_str("...");
    cut
}

impl ValidationStrategy for CitationValidator {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(
        &self,
        response: &JsonValue,
        context: &ValidationContext,
    ) -> Result<ValidationResult, StrategyError> {
        let field = &self.citations_field;

        let citations: Vec<&str> = match lookup(response, field) {
            Some(JsonValue::Array(items)) => {
                match items.iter().map(JsonValue::as_str).collect::<Option<Vec<_>>>() {
                    Some(citations) => citations,
                    None => {
                        return Ok(ValidationResult::fail(format!(
                            "'{field}' must contain only strings"
                        ))
                        .with_suggestion(format!("Return '{field}' as a list of quoted passages")))
                    }
                }
            }
            Some(_) => {
                return Ok(ValidationResult::fail(format!("'{field}' must be an array of strings"))
                    .with_suggestion(format!("Return '{field}' as a list of quoted passages")))
            }
            None => {
                return Ok(ValidationResult::fail(format!("missing '{field}' field"))
                    .with_suggestion(format!(
                        "Include a '{field}' list quoting the source passages you relied on"
                    )))
            }
        };

        if citations.is_empty() {
            return Ok(ValidationResult::fail("no citations provided").with_suggestion(
                "Include citations that quote the reference text supporting each claim",
            ));
        }

        let references = context.reference_texts();
        if references.is_empty() {
            return Ok(ValidationResult::pass()
                .with_debug("warning", "no reference texts supplied; citations not checked")
                .with_debug("citations", citations.len()));
        }

        let unmatched: Vec<JsonValue> = citations
            .iter()
            .enumerate()
            .filter_map(|(index, citation)| {
                let score = Self::best_score(citation, &references);
                (score < self.min_score).then(|| {
                    json!({
                        "index": index,
                        "text": truncate(citation),
                        "best_score": score,
                    })
                })
            })
            .collect();

        if unmatched.is_empty() {
            return Ok(ValidationResult::pass()
                .with_debug("citations", citations.len())
                .with_debug("min_score", self.min_score));
        }

        let count = unmatched.len();
        Ok(ValidationResult::fail(format!(
            "{count} of {} citation(s) not found in the reference texts (min score {})",
            citations.len(),
            self.min_score
        ))
        .with_debug("unmatched", JsonValue::Array(unmatched))
        .with_debug("min_score", self.min_score)
        .with_suggestion("Quote citations verbatim from the reference texts")
        .with_suggestion("Remove citations that do not appear in the supplied references"))
    }

    fn description(&self) -> &str {
        "Citations fuzzily match the reference texts"
    }
}

fn default_min_score() -> f64 {
    DEFAULT_MIN_SCORE
}

fn default_citations_field() -> String {
    "citations".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    #[serde(default = "default_min_score")]
    min_score: f64,
    #[serde(default = "default_citations_field")]
    citations_field: String,
}

/// Factory for [`CitationValidator`].
///
/// ```json
/// { "min_score": 85, "citations_field": "citations" }
/// ```
pub struct CitationFactory;

impl StrategyFactory for CitationFactory {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn create(
        &self,
        name: &str,
        params: &JsonValue,
    ) -> Result<Arc<dyn ValidationStrategy>, StrategyError> {
        let params: Params = parse_params(KIND, params)?;
        Ok(Arc::new(
            CitationValidator::new(name, params.min_score)?.citations_field(params.citations_field),
        ))
    }

    fn default_params(&self) -> JsonValue {
        json!({ "min_score": DEFAULT_MIN_SCORE, "citations_field": "citations" })
    }

    fn description(&self) -> &'static str {
        "Fuzzy-matches citations against context reference texts"
    }
}
