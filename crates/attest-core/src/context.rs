//! Caller-supplied data that strategies may consult.
//!
//! Validators never fetch external data themselves. Anything they need,
//! such as the reference texts used for citation matching, is placed in
//! the context before the pipeline runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Context key holding the reference corpus for citation checks.
pub const REFERENCE_TEXTS_KEY: &str = "reference_texts";

/// Context key holding the 1-based attempt number (set by the orchestrator).
pub const ATTEMPT_KEY: &str = "attempt";

/// String-keyed bag of JSON values passed to every strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationContext {
    values: BTreeMap<String, JsonValue>,
}

impl ValidationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set the reference texts used by citation matching.
    pub fn with_reference_texts<I, S>(self, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let texts: Vec<JsonValue> = texts
            .into_iter()
            .map(|t| JsonValue::String(t.into()))
            .collect();
        self.with(REFERENCE_TEXTS_KEY, JsonValue::Array(texts))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.values.get(key)
    }

    /// Reference texts, in the order supplied. Non-string entries are ignored.
    pub fn reference_texts(&self) -> Vec<&str> {
        self.values
            .get(REFERENCE_TEXTS_KEY)
            .and_then(JsonValue::as_array)
            .map(|items| items.iter().filter_map(JsonValue::as_str).collect())
            .unwrap_or_default()
    }

    /// Attempt number, when running under the orchestrator.
    pub fn attempt(&self) -> Option<u64> {
        self.values.get(ATTEMPT_KEY).and_then(JsonValue::as_u64)
    }

    /// Snapshot of all values, used as trace context.
    pub fn as_map(&self) -> &BTreeMap<String, JsonValue> {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
