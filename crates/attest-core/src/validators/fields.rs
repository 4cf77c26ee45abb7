//! Field presence check.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::context::ValidationContext;
use crate::result::ValidationResult;
use crate::strategy::{parse_params, StrategyError, StrategyFactory, ValidationStrategy};

use super::{is_empty_value, lookup};

const KIND: &str = "required_fields";

/// Fails when any required field is missing, null, or (unless allowed) empty.
#[derive(Debug, Clone)]
pub struct RequiredFieldsValidator {
    name: String,
    fields: Vec<String>,
    allow_empty: bool,
}

impl RequiredFieldsValidator {
    pub fn new<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            allow_empty: false,
        }
    }

    pub fn allow_empty(mut self, allow: bool) -> Self {
        self.allow_empty = allow;
        self
    }
}

impl ValidationStrategy for RequiredFieldsValidator {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(
        &self,
        response: &JsonValue,
        _context: &ValidationContext,
    ) -> Result<ValidationResult, StrategyError> {
        let mut missing = Vec::new();
        let mut empty = Vec::new();

        for field in &self.fields {
            match lookup(response, field) {
                None | Some(JsonValue::Null) => missing.push(field.as_str()),
                Some(value) if !self.allow_empty && is_empty_value(value) => {
                    empty.push(field.as_str())
                }
                Some(_) => {}
            }
        }

        if missing.is_empty() && empty.is_empty() {
            return Ok(ValidationResult::pass().with_debug("checked", self.fields.len()));
        }

        let mut problems = Vec::new();
        if !missing.is_empty() {
            problems.push(format!("missing required fields: {}", missing.join(", ")));
        }
        if !empty.is_empty() {
            problems.push(format!("empty required fields: {}", empty.join(", ")));
        }

        let suggestions = missing
            .iter()
            .map(|f| format!("Include the '{f}' field in the response"))
            .chain(empty.iter().map(|f| format!("Provide a non-empty value for '{f}'")));

        Ok(ValidationResult::fail(problems.join("; "))
            .with_debug("missing", missing.clone())
            .with_debug("empty", empty.clone())
            .with_suggestions(suggestions))
    }

    fn description(&self) -> &str {
        "Required fields are present and non-empty"
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    fields: Vec<String>,
    #[serde(default)]
    allow_empty: bool,
}

/// Factory for [`RequiredFieldsValidator`].
///
/// ```json
/// { "fields": ["title", "summary.text"], "allow_empty": false }
/// ```
pub struct RequiredFieldsFactory;

impl StrategyFactory for RequiredFieldsFactory {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn create(
        &self,
        name: &str,
        params: &JsonValue,
    ) -> Result<Arc<dyn ValidationStrategy>, StrategyError> {
        let params: Params = parse_params(KIND, params)?;
        if params.fields.is_empty() {
            return Err(StrategyError::invalid_config(KIND, "'fields' must not be empty"));
        }
        Ok(Arc::new(
            RequiredFieldsValidator::new(name, params.fields).allow_empty(params.allow_empty),
        ))
    }

    fn description(&self) -> &'static str {
        "Checks that named fields exist and are non-empty"
    }
}
