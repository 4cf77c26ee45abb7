//! Table shape check for extracted tables.
//!
//! Expects the configured field to hold an array of tables shaped like
//! `{"headers": [...], "rows": [[...], ...]}`.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::context::ValidationContext;
use crate::result::ValidationResult;
use crate::strategy::{parse_params, StrategyError, StrategyFactory, ValidationStrategy};

use super::lookup;

const KIND: &str = "table_shape";

#[derive(Debug, Clone)]
pub struct TableShapeValidator {
    name: String,
    field: String,
    min_rows: usize,
    require_headers: bool,
}

impl TableShapeValidator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: default_field(),
            min_rows: default_min_rows(),
            require_headers: true,
        }
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    pub fn min_rows(mut self, min_rows: usize) -> Self {
        self.min_rows = min_rows;
        self
    }

    pub fn require_headers(mut self, require: bool) -> Self {
        self.require_headers = require;
        self
    }

    /// Problems found in one table, as human-readable strings.
    fn check_table(&self, index: usize, table: &JsonValue) -> Vec<String> {
        let mut problems = Vec::new();

        let Some(table) = table.as_object() else {
            problems.push(format!("table {index} is not an object"));
            return problems;
        };

        let headers = table.get("headers").and_then(JsonValue::as_array);
        let width = headers.map(Vec::len).unwrap_or(0);
        if self.require_headers && width == 0 {
            problems.push(format!("table {index} has no headers"));
        }

        let Some(rows) = table.get("rows").and_then(JsonValue::as_array) else {
            problems.push(format!("table {index} has no 'rows' array"));
            return problems;
        };

        if rows.len() < self.min_rows {
            problems.push(format!(
                "table {index} has {} row(s), expected at least {}",
                rows.len(),
                self.min_rows
            ));
        }

        // Without headers, the first row defines the expected width
        let expected = if width > 0 {
            width
        } else {
            rows.first().and_then(JsonValue::as_array).map(Vec::len).unwrap_or(0)
        };

        for (row_index, row) in rows.iter().enumerate() {
            match row.as_array() {
                Some(cells) if cells.len() == expected => {}
                Some(cells) => problems.push(format!(
                    "table {index} row {row_index} has {} cell(s), expected {expected}",
                    cells.len()
                )),
                None => problems.push(format!("table {index} row {row_index} is not an array")),
            }
        }

        problems
    }
}

impl ValidationStrategy for TableShapeValidator {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(
        &self,
        response: &JsonValue,
        _context: &ValidationContext,
    ) -> Result<ValidationResult, StrategyError> {
        let Some(tables) = lookup(response, &self.field).and_then(JsonValue::as_array) else {
            return Ok(ValidationResult::fail(format!("'{}' must be an array of tables", self.field))
                .with_suggestion(format!(
                    "Return '{}' as a list of objects with 'headers' and 'rows'",
                    self.field
                )));
        };

        let problems: Vec<String> = tables
            .iter()
            .enumerate()
            .flat_map(|(i, table)| self.check_table(i, table))
            .collect();

        if problems.is_empty() {
            return Ok(ValidationResult::pass().with_debug("tables", tables.len()));
        }

        Ok(ValidationResult::fail(format!(
            "{} table shape problem(s): {}",
            problems.len(),
            problems.join("; ")
        ))
        .with_debug("problems", json!(problems))
        .with_suggestion("Make every row contain exactly one cell per header; use empty strings for blank cells"))
    }

    fn description(&self) -> &str {
        "Extracted tables have headers and rectangular rows"
    }
}

fn default_field() -> String {
    "tables".to_string()
}

fn default_min_rows() -> usize {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    #[serde(default = "default_field")]
    field: String,
    #[serde(default = "default_min_rows")]
    min_rows: usize,
    #[serde(default = "default_true")]
    require_headers: bool,
}

/// Factory for [`TableShapeValidator`].
pub struct TableShapeFactory;

impl StrategyFactory for TableShapeFactory {
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
            TableShapeValidator::new(name)
                .field(params.field)
                .min_rows(params.min_rows)
                .require_headers(params.require_headers),
        ))
    }

    fn default_params(&self) -> JsonValue {
        json!({ "field": "tables", "min_rows": 1, "require_headers": true })
    }

    fn description(&self) -> &'static str {
        "Checks table headers and row widths"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(v: &TableShapeValidator, response: JsonValue) -> ValidationResult {
        v.validate(&response, &ValidationContext::new()).unwrap()
    }

    #[test]
    fn test_rectangular_table_passes() {
        let v = TableShapeValidator::new("tables");
        let response = json!({
            "tables": [{ "headers": ["a", "b"], "rows": [["1", "2"], ["3", ""]] }]
        });
        assert!(validate(&v, response).is_valid());
    }

    #[test]
    fn test_ragged_rows_reported() {
        let v = TableShapeValidator::new("tables");
        let response = json!({
            "tables": [{ "headers": ["a", "b"], "rows": [["1"], ["3", "4", "5"]] }]
        });
        let result = validate(&v, response);
        assert!(!result.is_valid());

        let problems = result.debug_info()["problems"].as_array().unwrap();
        assert_eq!(problems.len(), 2);
        assert_eq!(problems[0], json!("table 0 row 0 has 1 cell(s), expected 2"));
    }

    #[test]
    fn test_missing_headers_and_rows() {
        let v = TableShapeValidator::new("tables").min_rows(2);
        let response = json!({ "tables": [{ "headers": [], "rows": [["x"]] }] });
        let result = validate(&v, response);
        assert!(!result.is_valid());
        assert!(result.error().unwrap().contains("has no headers"));
        assert!(result.error().unwrap().contains("expected at least 2"));
    }

    #[test]
    fn test_headers_optional() {
        let v = TableShapeValidator::new("tables").require_headers(false);
        let response = json!({ "tables": [{ "rows": [["x", "y"], ["z", "w"]] }] });
        assert!(validate(&v, response).is_valid());
    }

    #[test]
    fn test_field_not_array() {
        let v = TableShapeValidator::new("tables");
        assert!(!validate(&v, json!({"tables": "none"})).is_valid());
    }

    #[test]
    fn test_factory_defaults() {
        let strategy = TableShapeFactory.create("t", &JsonValue::Null).unwrap();
        let result = strategy
            .validate(&json!({"tables": []}), &ValidationContext::new())
            .unwrap();
        assert!(result.is_valid());
    }
}
