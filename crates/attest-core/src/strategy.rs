//! Strategy and factory traits.
//!
//! A [`ValidationStrategy`] checks one response and returns a
//! [`ValidationResult`]. Strategies are configured once, at construction,
//! and hold no mutable state afterwards, so a single instance can validate
//! many responses concurrently.
//!
//! A [`StrategyFactory`] builds strategies from JSON parameters. Factories
//! are what the registry stores for parameterised creation and what plugin
//! definitions refer to through their `kind`.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::context::ValidationContext;
use crate::result::ValidationResult;

/// Errors raised by strategies and their factories.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrategyError {
    /// The strategy could not run to completion.
    #[error("{0}")]
    Execution(String),

    /// Construction parameters were rejected.
    #[error("invalid configuration for '{kind}': {message}")]
    InvalidConfig { kind: String, message: String },
}

impl StrategyError {
    pub fn invalid_config(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// A pluggable check applied to a model response.
///
/// # Contract
/// - `validate` MUST NOT perform I/O; anything external arrives via `context`
/// - `validate` MUST be safe to call concurrently on one instance
/// - a returned `Err` is treated as a failing result by the pipeline, not as
///   a reason to abort
pub trait ValidationStrategy: Send + Sync {
    /// Registry name of this strategy.
    fn name(&self) -> &str;

    /// Check a response.
    fn validate(
        &self,
        response: &JsonValue,
        context: &ValidationContext,
    ) -> Result<ValidationResult, StrategyError>;

    /// Short human-readable description.
    fn description(&self) -> &str {
        ""
    }
}

/// Creates strategies from configuration.
pub trait StrategyFactory: Send + Sync {
    /// Identifier that plugin definitions use to refer to this factory.
    ///
    /// Examples: "citation", "required_fields", "json_schema"
    fn kind(&self) -> &'static str;

    /// Build a strategy that will report `name` from [`ValidationStrategy::name`].
    fn create(
        &self,
        name: &str,
        params: &JsonValue,
    ) -> Result<Arc<dyn ValidationStrategy>, StrategyError>;

    /// Check parameters without keeping the strategy.
    fn validate_params(&self, params: &JsonValue) -> Result<(), StrategyError> {
        self.create(self.kind(), params).map(|_| ())
    }

    /// Parameters used when none are supplied.
    fn default_params(&self) -> JsonValue {
        JsonValue::Object(serde_json::Map::new())
    }

    fn description(&self) -> &'static str {
        "Validation strategy"
    }
}

/// Wraps a strategy so it reports a different name.
///
/// Used when an instance is registered under a name other than the one it
/// was built with.
pub(crate) struct NamedStrategy {
    name: String,
    inner: Arc<dyn ValidationStrategy>,
}

impl NamedStrategy {
    pub(crate) fn new(name: impl Into<String>, inner: Arc<dyn ValidationStrategy>) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }
}

impl ValidationStrategy for NamedStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(
        &self,
        response: &JsonValue,
        context: &ValidationContext,
    ) -> Result<ValidationResult, StrategyError> {
        self.inner.validate(response, context)
    }

    fn description(&self) -> &str {
        self.inner.description()
    }
}

/// Deserialize factory parameters, mapping serde errors to `InvalidConfig`.
///
/// `null` is treated as an empty object so factories can rely on
/// `#[serde(default)]` fields.
pub fn parse_params<T: DeserializeOwned>(kind: &str, params: &JsonValue) -> Result<T, StrategyError> {
    let params = if params.is_null() {
        JsonValue::Object(serde_json::Map::new())
    } else {
        params.clone()
    };
    serde_json::from_value(params).map_err(|e| StrategyError::invalid_config(kind, e.to_string()))
}
