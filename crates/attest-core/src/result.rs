//! Validation results produced by strategies.
//!
//! A [`ValidationResult`] is created once per strategy per attempt and is
//! never mutated afterwards. All fields are private; the consuming builder
//! methods are only usable while the value is still being constructed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Outcome of running one strategy against one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    valid: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,

    /// Diagnostics keyed by name (BTreeMap keeps output ordering deterministic)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    debug_info: BTreeMap<String, JsonValue>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    suggestions: Vec<String>,
}

impl ValidationResult {
    /// A passing result with no diagnostics.
    pub fn pass() -> Self {
        Self {
            valid: true,
            error: None,
            debug_info: BTreeMap::new(),
            suggestions: Vec::new(),
        }
    }

    /// A failing result with an error message.
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
            debug_info: BTreeMap::new(),
            suggestions: Vec::new(),
        }
    }

    /// Attach a debug entry.
    pub fn with_debug(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.debug_info.insert(key.into(), value.into());
        self
    }

    /// Attach a suggestion for how to fix the response.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Attach several suggestions, preserving their order.
    pub fn with_suggestions<I, S>(mut self, suggestions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suggestions
            .extend(suggestions.into_iter().map(Into::into));
        self
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn debug_info(&self) -> &BTreeMap<String, JsonValue> {
        &self.debug_info
    }

    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }
}
