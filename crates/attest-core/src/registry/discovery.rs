//! Directory discovery of declarative strategy plugins.
//!
//! Each `.yaml`, `.yml` or `.json` file in the directory defines one
//! strategy by naming a registered factory kind and its parameters:
//!
//! ```yaml
//! name: invoice_citations
//! kind: citation
//! description: Invoice line items quote the source PDF
//! params:
//!   min_score: 85
//! ```
//!
//! A broken file never aborts discovery. It is logged, recorded in the
//! [`DiscoveryReport`], and the remaining files are still loaded.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use super::{RegistryError, StrategyRegistry};

/// Embedded plugin schema.
const PLUGIN_SCHEMA_JSON: &str = include_str!("../../schema/strategy-plugin.schema.json");

static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

const EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// A plugin file that could not be registered.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("failed to load plugin {}: {reason}", .path.display())]
pub struct PluginLoadError {
    pub path: PathBuf,
    pub reason: String,
}

impl PluginLoadError {
    fn new(path: &Path, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// One plugin definition file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginDefinition {
    pub name: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<JsonValue>,
}

/// What a discovery pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryReport {
    /// Registered strategy names, in file order
    pub registered: Vec<String>,
    /// Private plugins (leading `_`) that were not loaded
    pub skipped: Vec<PathBuf>,
    pub errors: Vec<PluginLoadError>,
}

impl DiscoveryReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

enum Outcome {
    Registered(String),
    Skipped,
}

fn plugin_validator() -> Result<&'static jsonschema::Validator, String> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema: JsonValue = serde_json::from_str(PLUGIN_SCHEMA_JSON)
            .map_err(|e| format!("invalid plugin schema JSON: {e}"))?;
        jsonschema::options()
            .build(&schema)
            .map_err(|e| format!("failed to compile plugin schema: {e}"))
    });
    result.as_ref().map_err(Clone::clone)
}

/// Check a raw definition against the plugin schema.
pub fn validate_plugin_schema(definition: &JsonValue) -> Result<(), Vec<String>> {
    let validator = plugin_validator().map_err(|e| vec![e])?;
    let errors: Vec<String> = validator
        .iter_errors(definition)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Parse a plugin file body according to its extension.
pub fn parse_plugin(content: &str, extension: &str) -> Result<JsonValue, String> {
    if extension == "json" {
        serde_json::from_str(content).map_err(|e| format!("invalid JSON: {e}"))
    } else {
        serde_yaml::from_str(content).map_err(|e| format!("invalid YAML: {e}"))
    }
}

fn plugin_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

impl StrategyRegistry {
    /// Load every plugin definition in `dir`.
    ///
    /// Only an unreadable directory is an error. Per-file problems are
    /// collected in [`DiscoveryReport::errors`].
    pub fn discover(&self, dir: impl AsRef<Path>) -> Result<DiscoveryReport, RegistryError> {
        let dir = dir.as_ref();
        let read_dir = fs::read_dir(dir).map_err(|e| RegistryError::Discovery {
            path: dir.display().to_string(),
            message: e.to_string(),
        })?;

        let mut files: Vec<(PathBuf, String)> = read_dir
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter_map(|path| plugin_extension(&path).map(|ext| (path, ext)))
            .collect();
        files.sort_by(|(a, _), (b, _)| a.file_name().cmp(&b.file_name()));

        let mut report = DiscoveryReport::default();
        for (path, ext) in files {
            match self.load_plugin(&path, &ext) {
                Ok(Outcome::Registered(name)) => {
                    tracing::info!(strategy = %name, path = %path.display(), "discovered strategy plugin");
                    report.registered.push(name);
                }
                Ok(Outcome::Skipped) => {
                    tracing::debug!(path = %path.display(), "skipping private plugin");
                    report.skipped.push(path);
                }
                Err(e) => {
                    tracing::error!(path = %e.path.display(), reason = %e.reason, "failed to load plugin");
                    report.errors.push(e);
                }
            }
        }

        Ok(report)
    }

    fn load_plugin(&self, path: &Path, ext: &str) -> Result<Outcome, PluginLoadError> {
        let private_file = path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|s| s.starts_with('_'));
        if private_file {
            return Ok(Outcome::Skipped);
        }

        let content = fs::read_to_string(path).map_err(|e| PluginLoadError::new(path, e.to_string()))?;
        let raw = parse_plugin(&content, ext).map_err(|e| PluginLoadError::new(path, e))?;

        validate_plugin_schema(&raw)
            .map_err(|errors| PluginLoadError::new(path, format!("schema violation: {}", errors.join("; "))))?;

        let definition: PluginDefinition =
            serde_json::from_value(raw).map_err(|e| PluginLoadError::new(path, e.to_string()))?;

        if definition.name.starts_with('_') {
            return Ok(Outcome::Skipped);
        }

        let factory = self.factory_for_kind(&definition.kind).ok_or_else(|| {
            PluginLoadError::new(path, format!("unknown strategy kind '{}'", definition.kind))
        })?;

        let params = definition.params.unwrap_or_else(|| factory.default_params());
        let name = super::normalize_name(&definition.name)
            .map_err(|e| PluginLoadError::new(path, e.to_string()))?;

        self.insert_factory(&name, factory, params, definition.description)
            .map_err(|e| PluginLoadError::new(path, e.to_string()))?;

        Ok(Outcome::Registered(name))
    }
}
