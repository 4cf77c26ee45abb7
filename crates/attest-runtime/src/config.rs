//! Runtime configuration.
//!
//! ```yaml
//! retry:
//!   max_attempts: 3
//!   initial_delay: 500ms
//!   backoff_factor: 2.0
//!   max_delay: 10s
//!   call_timeout: 30s
//! pipeline_mode: run_all
//! max_concurrency: 4
//! ```
//!
//! Durations use humantime strings ("250ms", "2m 30s").

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use attest_core::PipelineMode;

use crate::resilience::BackoffSchedule;

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Retry policy for one orchestration call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts, including the first (>= 1)
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(with = "duration_human")]
    pub initial_delay: Duration,

    /// Multiplier applied per attempt (>= 1.0)
    pub backoff_factor: f64,

    /// Cap on any single delay
    #[serde(with = "duration_human")]
    pub max_delay: Duration,

    /// Print the trace summary when the call finishes
    pub debug_mode: bool,

    /// Limit on each model call
    #[serde(with = "option_duration_human", skip_serializing_if = "Option::is_none")]
    pub call_timeout: Option<Duration>,

    /// Limit on the whole orchestration, including backoff
    #[serde(with = "option_duration_human", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(10),
            debug_mode: false,
            call_timeout: None,
            timeout: None,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_delays(mut self, initial: Duration, factor: f64, max: Duration) -> Self {
        self.initial_delay = initial;
        self.backoff_factor = factor;
        self.max_delay = max;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug_mode = debug;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Check invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".to_string()));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "backoff_factor must be a finite number >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        if self.max_delay < self.initial_delay {
            return Err(ConfigError::Invalid(format!(
                "max_delay ({}) is shorter than initial_delay ({})",
                humantime::format_duration(self.max_delay),
                humantime::format_duration(self.initial_delay)
            )));
        }
        if self.call_timeout == Some(Duration::ZERO) || self.timeout == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Delay after the failure of 0-based `attempt`:
    /// `min(initial_delay * backoff_factor^attempt, max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        BackoffSchedule::new(self).delay_at(attempt)
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub retry: RetryConfig,

    pub pipeline_mode: PipelineMode,

    /// Simultaneous requests in a batch
    pub max_concurrency: usize,

    /// Reject duplicate strategy registrations
    pub strict_registry: bool,

    /// Directory of plugin definitions to discover at startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            pipeline_mode: PipelineMode::RunAll,
            max_concurrency: 4,
            strict_registry: false,
            plugin_dir: None,
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load a file, choosing the format by extension (`.json`, else YAML).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be at least 1".to_string()));
        }
        Ok(())
    }
}

mod duration_human {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

mod option_duration_human {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|text| humantime::parse_duration(&text).map_err(serde::de::Error::custom))
            .transpose()
    }
}
