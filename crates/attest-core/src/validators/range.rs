//! Length / range check.
//!
//! Measures a single field: character count for strings, element count for
//! arrays, the value itself for numbers. Bounds are inclusive.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::context::ValidationContext;
use crate::result::ValidationResult;
use crate::strategy::{parse_params, StrategyError, StrategyFactory, ValidationStrategy};

use super::lookup;

const KIND: &str = "range";

#[derive(Debug, Clone)]
pub struct RangeValidator {
    name: String,
    field: String,
    min: Option<f64>,
    max: Option<f64>,
}

impl RangeValidator {
    pub fn new(
        name: impl Into<String>,
        field: impl Into<String>,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Result<Self, StrategyError> {
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return Err(StrategyError::invalid_config(
                    KIND,
                    format!("min ({lo}) is greater than max ({hi})"),
                ));
            }
        }
        if min.is_some_and(|v| !v.is_finite()) || max.is_some_and(|v| !v.is_finite()) {
            return Err(StrategyError::invalid_config(KIND, "bounds must be finite"));
        }
        Ok(Self {
            name: name.into(),
            field: field.into(),
            min,
            max,
        })
    }

    fn describe_bounds(&self) -> String {
        match (self.min, self.max) {
            (Some(lo), Some(hi)) => format!("between {lo} and {hi}"),
            (Some(lo), None) => format!("at least {lo}"),
            (None, Some(hi)) => format!("at most {hi}"),
            (None, None) => "unbounded".to_string(),
        }
    }
}

/// What was measured and how.
fn measure(value: &JsonValue) -> Option<(f64, &'static str)> {
    match value {
        JsonValue::String(s) => Some((s.chars().count() as f64, "length")),
        JsonValue::Array(items) => Some((items.len() as f64, "item count")),
        JsonValue::Number(n) => n.as_f64().map(|v| (v, "value")),
        _ => None,
    }
}

impl ValidationStrategy for RangeValidator {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(
        &self,
        response: &JsonValue,
        _context: &ValidationContext,
    ) -> Result<ValidationResult, StrategyError> {
        let Some(value) = lookup(response, &self.field) else {
            return Ok(ValidationResult::fail(format!("field '{}' not found", self.field))
                .with_suggestion(format!("Include the '{}' field", self.field)));
        };

        let Some((measured, unit)) = measure(value) else {
            return Ok(ValidationResult::fail(format!(
                "field '{}' is not a string, array or number",
                self.field
            )));
        };

        let too_small = self.min.is_some_and(|lo| measured < lo);
        let too_large = self.max.is_some_and(|hi| measured > hi);

        if !too_small && !too_large {
            return Ok(ValidationResult::pass().with_debug("measured", measured));
        }

        let bounds = self.describe_bounds();
        let suggestion = match (unit, too_small) {
            ("value", _) => format!("Use a value {bounds} for '{}'", self.field),
            (_, true) => format!("Expand '{}' so its {unit} is {bounds}", self.field),
            (_, false) => format!("Shorten '{}' so its {unit} is {bounds}", self.field),
        };

        Ok(ValidationResult::fail(format!(
            "field '{}' {unit} {measured} is out of range (expected {bounds})",
            self.field
        ))
        .with_debug("measured", measured)
        .with_debug("unit", unit)
        .with_debug("direction", if too_small { "below_min" } else { "above_max" })
        .with_suggestion(suggestion))
    }

    fn description(&self) -> &str {
        "Field length or value lies within bounds"
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    field: String,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
}

/// Factory for [`RangeValidator`].
///
/// ```json
/// { "field": "summary", "min": 20, "max": 500 }
/// ```
pub struct RangeFactory;

impl StrategyFactory for RangeFactory {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn create(
        &self,
        name: &str,
        params: &JsonValue,
    ) -> Result<Arc<dyn ValidationStrategy>, StrategyError> {
        let params: Params = parse_params(KIND, params)?;
        if params.min.is_none() && params.max.is_none() {
            return Err(StrategyError::invalid_config(KIND, "at least one of 'min' or 'max' is required"));
        }
        Ok(Arc::new(RangeValidator::new(name, params.field, params.min, params.max)?))
    }

    fn description(&self) -> &'static str {
        "Checks string/array length or numeric value bounds"
    }
}
