//! Reference validation strategies.
//!
//! | Kind | Checks |
//! |------|--------|
//! | `required_fields` | named fields exist and are non-empty |
//! | `range` | string/array length or numeric value within bounds |
//! | `json_schema` | response conforms to a JSON Schema |
//! | `table_shape` | extracted tables have headers and rectangular rows |
//! | `citation` | cited passages fuzzily match the reference texts |

use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::strategy::StrategyFactory;

mod citation;
mod fields;
mod range;
mod schema;
mod table;

pub use citation::{CitationFactory, CitationValidator, DEFAULT_MIN_SCORE, MAX_CITATION_TEXT};
pub use fields::{RequiredFieldsFactory, RequiredFieldsValidator};
pub use range::{RangeFactory, RangeValidator};
pub use schema::{JsonSchemaFactory, JsonSchemaValidator};
pub use table::{TableShapeFactory, TableShapeValidator};

/// Factories for every built-in strategy kind.
pub fn builtin_factories() -> Vec<Arc<dyn StrategyFactory>> {
    vec![
        Arc::new(RequiredFieldsFactory),
        Arc::new(RangeFactory),
        Arc::new(JsonSchemaFactory),
        Arc::new(TableShapeFactory),
        Arc::new(CitationFactory),
    ]
}

/// Resolve a field path inside a response.
///
/// Accepts a JSON pointer (`/items/0/name`) or a dotted path
/// (`items.0.name`). An empty path resolves to the value itself.
pub(crate) fn lookup<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    if path.is_empty() {
        return Some(value);
    }
    if path.starts_with('/') {
        return value.pointer(path);
    }

    path.split('.').try_fold(value, |current, segment| match current {
        JsonValue::Object(map) => map.get(segment),
        JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Whether a value counts as "empty" for presence checks.
pub(crate) fn is_empty_value(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(s) => s.trim().is_empty(),
        JsonValue::Array(items) => items.is_empty(),
        JsonValue::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_dotted_and_pointer() {
        let value = json!({"doc": {"items": [{"name": "a"}, {"name": "b"}]}});

        assert_eq!(lookup(&value, "doc.items.1.name"), Some(&json!("b")));
        assert_eq!(lookup(&value, "/doc/items/0/name"), Some(&json!("a")));
        assert_eq!(lookup(&value, "doc.missing"), None);
        assert_eq!(lookup(&value, "doc.items.x"), None);
        assert_eq!(lookup(&value, ""), Some(&value));
    }

    #[test]
    fn test_is_empty_value() {
        assert!(is_empty_value(&json!(null)));
        assert!(is_empty_value(&json!("  ")));
        assert!(is_empty_value(&json!([])));
        assert!(is_empty_value(&json!({})));
        assert!(!is_empty_value(&json!(0)));
        assert!(!is_empty_value(&json!(false)));
    }

    #[test]
    fn test_builtin_kinds_are_unique() {
        let mut kinds: Vec<&str> = builtin_factories().iter().map(|f| f.kind()).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), 5);
    }
}
