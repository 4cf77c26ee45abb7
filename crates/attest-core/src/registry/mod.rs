//! Named strategy registry.
//!
//! The registry maps lowercase names to either a factory with bound
//! parameters or a singleton instance. Strategies built from factories are
//! memoized per (name, parameters), so repeated lookups hand out the same
//! `Arc`.
//!
//! ```
//! use attest_core::registry::StrategyRegistry;
//!
//! let registry = StrategyRegistry::with_builtins();
//! let strategy = registry.get("citation").unwrap();
//! assert_eq!(strategy.name(), "citation");
//! ```
//!
//! Entries are added at startup, either directly or through
//! [`StrategyRegistry::discover`]. Re-registering a name replaces the old
//! entry with a warning, or fails when the registry is strict.

mod discovery;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::strategy::{NamedStrategy, StrategyError, StrategyFactory, ValidationStrategy};
use crate::validators::builtin_factories;

pub use discovery::{DiscoveryReport, PluginDefinition, PluginLoadError};

/// Errors from registry operations.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("strategy '{name}' is already registered")]
    DuplicateStrategy { name: String },

    #[error("unknown strategy '{name}'")]
    UnknownStrategy { name: String },

    #[error("invalid strategy name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("failed to build strategy '{name}': {source}")]
    Strategy {
        name: String,
        #[source]
        source: StrategyError,
    },

    #[error("discovery failed for {path}: {message}")]
    Discovery { path: String, message: String },
}

enum Entry {
    Factory {
        factory: Arc<dyn StrategyFactory>,
        params: JsonValue,
        description: Option<String>,
    },
    Instance(Arc<dyn ValidationStrategy>),
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
    kinds: BTreeMap<String, Arc<dyn StrategyFactory>>,
    /// (name, canonical params) -> built strategy
    memo: HashMap<(String, String), Arc<dyn ValidationStrategy>>,
    /// Bumped whenever a name is (re)registered
    generations: HashMap<String, u64>,
}

/// One line of [`StrategyRegistry::describe`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyInfo {
    pub name: String,
    /// Factory kind, `None` for singleton instances
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub description: String,
}

/// Thread-safe registry of validation strategies.
#[derive(Default)]
pub struct StrategyRegistry {
    inner: RwLock<Inner>,
    strict: bool,
}

impl StrategyRegistry {
    /// Create an empty, non-strict registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with every built-in strategy registered under its kind.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for factory in builtin_factories() {
            let kind = factory.kind();
            // Empty registry, builtin kinds are unique and valid names
            if let Err(e) = registry.register(kind, factory) {
                tracing::error!(kind, error = %e, "failed to register builtin strategy");
            }
        }
        registry
    }

    /// Reject duplicate registrations instead of replacing.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Register a factory under `name`, bound to its default parameters.
    ///
    /// Defaults are not checked here: kinds such as `range` need
    /// parameters supplied through [`get_with`](Self::get_with).
    pub fn register(
        &self,
        name: &str,
        factory: Arc<dyn StrategyFactory>,
    ) -> Result<(), RegistryError> {
        let name = normalize_name(name)?;
        let params = factory.default_params();
        self.store_factory(name, factory, params, None)
    }

    /// Register a factory under `name` with bound parameters.
    ///
    /// Parameters are checked with [`StrategyFactory::validate_params`]
    /// before anything is stored.
    pub fn register_configured(
        &self,
        name: &str,
        factory: Arc<dyn StrategyFactory>,
        params: JsonValue,
    ) -> Result<(), RegistryError> {
        self.insert_factory(name, factory, params, None)
    }

    pub(crate) fn insert_factory(
        &self,
        name: &str,
        factory: Arc<dyn StrategyFactory>,
        params: JsonValue,
        description: Option<String>,
    ) -> Result<(), RegistryError> {
        let name = normalize_name(name)?;
        factory
            .validate_params(&params)
            .map_err(|source| RegistryError::Strategy {
                name: name.clone(),
                source,
            })?;
        self.store_factory(name, factory, params, description)
    }

    fn store_factory(
        &self,
        name: String,
        factory: Arc<dyn StrategyFactory>,
        params: JsonValue,
        description: Option<String>,
    ) -> Result<(), RegistryError> {
        let kind = factory.kind().to_string();
        let mut inner = self.inner.write();
        inner.kinds.entry(kind).or_insert_with(|| Arc::clone(&factory));
        self.insert_entry(
            &mut inner,
            name,
            Entry::Factory {
                factory,
                params,
                description,
            },
        )
    }

    /// Register a singleton strategy instance.
    ///
    /// If the instance reports a different name it is wrapped, so
    /// `get(name).name() == name` always holds.
    pub fn register_instance(
        &self,
        name: &str,
        strategy: Arc<dyn ValidationStrategy>,
    ) -> Result<(), RegistryError> {
        let name = normalize_name(name)?;
        let strategy: Arc<dyn ValidationStrategy> = if strategy.name() == name {
            strategy
        } else {
            Arc::new(NamedStrategy::new(name.clone(), strategy))
        };

        let mut inner = self.inner.write();
        self.insert_entry(&mut inner, name, Entry::Instance(strategy))
    }

    /// Make a factory kind available to plugin definitions without
    /// registering a strategy name for it.
    pub fn register_kind(&self, factory: Arc<dyn StrategyFactory>) {
        let kind = factory.kind().to_string();
        let replaced = self.inner.write().kinds.insert(kind.clone(), factory).is_some();
        if replaced {
            tracing::warn!(kind = %kind, "replacing strategy factory kind");
        }
    }

    fn insert_entry(&self, inner: &mut Inner, name: String, entry: Entry) -> Result<(), RegistryError> {
        if inner.entries.contains_key(&name) {
            if self.strict {
                return Err(RegistryError::DuplicateStrategy { name });
            }
            tracing::warn!(strategy = %name, "replacing registered strategy");
            inner.memo.retain(|(memo_name, _), _| memo_name != &name);
        } else {
            tracing::debug!(strategy = %name, "registered strategy");
        }
        *inner.generations.entry(name.clone()).or_insert(0) += 1;
        inner.entries.insert(name, entry);
        Ok(())
    }

    /// Look up a strategy with its registered parameters.
    pub fn get(&self, name: &str) -> Result<Arc<dyn ValidationStrategy>, RegistryError> {
        self.get_with(name, &JsonValue::Null)
    }

    /// Look up a strategy, overriding registered parameters.
    ///
    /// Object parameters are merged key-by-key over the bound ones. Singleton
    /// instances accept no parameters.
    pub fn get_with(
        &self,
        name: &str,
        params: &JsonValue,
    ) -> Result<Arc<dyn ValidationStrategy>, RegistryError> {
        let name = normalize_name(name)?;

        let (factory, merged, generation) = {
            let inner = self.inner.read();
            match inner.entries.get(&name) {
                None => return Err(RegistryError::UnknownStrategy { name }),
                Some(Entry::Instance(strategy)) => {
                    if has_params(params) {
                        return Err(RegistryError::Strategy {
                            name,
                            source: StrategyError::invalid_config(
                                "instance",
                                "singleton strategies do not take parameters",
                            ),
                        });
                    }
                    return Ok(Arc::clone(strategy));
                }
                Some(Entry::Factory {
                    factory,
                    params: bound,
                    ..
                }) => {
                    let merged = merge_params(bound, params);
                    let key = (name.clone(), merged.to_string());
                    if let Some(strategy) = inner.memo.get(&key) {
                        return Ok(Arc::clone(strategy));
                    }
                    let generation = inner.generations.get(&name).copied();
                    (Arc::clone(factory), merged, generation)
                }
            }
        };

        let strategy = factory
            .create(&name, &merged)
            .map_err(|source| RegistryError::Strategy {
                name: name.clone(),
                source,
            })?;

        // `create` ran unlocked; only memoize if the entry was not replaced meanwhile
        let mut inner = self.inner.write();
        if inner.generations.get(&name).copied() != generation {
            tracing::debug!(strategy = %name, "entry replaced during lookup, not memoizing");
            return Ok(strategy);
        }
        let key = (name, merged.to_string());
        Ok(Arc::clone(inner.memo.entry(key).or_insert(strategy)))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.inner.read().entries.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        normalize_name(name)
            .map(|n| self.inner.read().entries.contains_key(&n))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Factory registered for a plugin `kind`.
    pub fn factory_for_kind(&self, kind: &str) -> Option<Arc<dyn StrategyFactory>> {
        self.inner.read().kinds.get(kind).cloned()
    }

    /// Known factory kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        self.inner.read().kinds.keys().cloned().collect()
    }

    /// Name, kind and description of every entry, sorted by name.
    pub fn describe(&self) -> Vec<StrategyInfo> {
        self.inner
            .read()
            .entries
            .iter()
            .map(|(name, entry)| match entry {
                Entry::Factory {
                    factory,
                    description,
                    ..
                } => StrategyInfo {
                    name: name.clone(),
                    kind: Some(factory.kind().to_string()),
                    description: description
                        .clone()
                        .unwrap_or_else(|| factory.description().to_string()),
                },
                Entry::Instance(strategy) => StrategyInfo {
                    name: name.clone(),
                    kind: None,
                    description: strategy.description().to_string(),
                },
            })
            .collect()
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("names", &self.names())
            .field("strict", &self.strict)
            .finish()
    }
}

/// Trim and lowercase a name, rejecting anything outside `[a-z0-9_.-]`.
pub fn normalize_name(name: &str) -> Result<String, RegistryError> {
    let normalized = name.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(RegistryError::InvalidName {
            name: name.to_string(),
            reason: "name is empty".to_string(),
        });
    }
    if let Some(bad) = normalized
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-')))
    {
        return Err(RegistryError::InvalidName {
            name: name.to_string(),
            reason: format!("unexpected character '{bad}'"),
        });
    }
    Ok(normalized)
}

fn has_params(params: &JsonValue) -> bool {
    match params {
        JsonValue::Null => false,
        JsonValue::Object(map) => !map.is_empty(),
        _ => true,
    }
}

fn merge_params(bound: &JsonValue, call: &JsonValue) -> JsonValue {
    match (bound, call) {
        (_, JsonValue::Null) => bound.clone(),
        (JsonValue::Object(base), JsonValue::Object(overrides)) => {
            let mut merged = base.clone();
            for (key, value) in overrides {
                merged.insert(key.clone(), value.clone());
            }
            JsonValue::Object(merged)
        }
        _ => call.clone(),
    }
}
