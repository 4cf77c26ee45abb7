//! Structural check against a JSON Schema.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::context::ValidationContext;
use crate::result::ValidationResult;
use crate::strategy::{StrategyError, StrategyFactory, ValidationStrategy};

const KIND: &str = "json_schema";

/// Maximum number of schema violations echoed into suggestions.
const MAX_REPORTED_VIOLATIONS: usize = 10;

/// Validates the whole response against a compiled schema.
pub struct JsonSchemaValidator {
    name: String,
    validator: jsonschema::Validator,
}

impl JsonSchemaValidator {
    /// Compile a schema.
    pub fn new(name: impl Into<String>, schema: &JsonValue) -> Result<Self, StrategyError> {
        let validator = jsonschema::options()
            .build(schema)
            .map_err(|e| StrategyError::invalid_config(KIND, format!("failed to compile schema: {e}")))?;
        Ok(Self {
            name: name.into(),
            validator,
        })
    }
}

impl std::fmt::Debug for JsonSchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonSchemaValidator")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ValidationStrategy for JsonSchemaValidator {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(
        &self,
        response: &JsonValue,
        _context: &ValidationContext,
    ) -> Result<ValidationResult, StrategyError> {
        let violations: Vec<String> = self
            .validator
            .iter_errors(response)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    format!("{e} at /")
                } else {
                    format!("{e} at {path}")
                }
            })
            .collect();

        if violations.is_empty() {
            return Ok(ValidationResult::pass());
        }

        let suggestions: Vec<String> = violations
            .iter()
            .take(MAX_REPORTED_VIOLATIONS)
            .map(|v| format!("Fix: {v}"))
            .collect();

        Ok(ValidationResult::fail(format!(
            "response does not match schema ({} violation(s))",
            violations.len()
        ))
        .with_debug("violations", violations)
        .with_suggestions(suggestions))
    }

    fn description(&self) -> &str {
        "Response conforms to a JSON Schema"
    }
}

/// Factory for [`JsonSchemaValidator`].
///
/// ```json
/// { "schema": { "type": "object", "required": ["title"] } }
/// ```
pub struct JsonSchemaFactory;

impl StrategyFactory for JsonSchemaFactory {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn create(
        &self,
        name: &str,
        params: &JsonValue,
    ) -> Result<Arc<dyn ValidationStrategy>, StrategyError> {
        let schema = params
            .get("schema")
            .ok_or_else(|| StrategyError::invalid_config(KIND, "missing 'schema'"))?;
        Ok(Arc::new(JsonSchemaValidator::new(name, schema)?))
    }

    fn description(&self) -> &'static str {
        "Checks the response against a JSON Schema"
    }
}
