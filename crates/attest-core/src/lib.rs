//! # attest-core
//!
//! Deterministic validation engine for structured model output.
//!
//! This crate holds everything that does not need a model or an async
//! runtime:
//! - the [`ValidationStrategy`] contract and its [`ValidationResult`]
//! - a [`StrategyRegistry`] with declarative plugin discovery
//! - the [`ValidationPipeline`] that runs strategies in order
//! - the [`DebugTracer`] trace tree
//! - reference validators, including fuzzy citation matching
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: same response and context, same results
//! 2. **No I/O in validators**: external data arrives through [`ValidationContext`]
//! 3. **Contained failures**: a broken strategy fails itself, not the pipeline
//! 4. **Concurrent-safe**: strategies are `Send + Sync` and immutable
//!
//! ## Example
//!
//! ```rust
//! use attest_core::{StrategyRegistry, ValidationContext, ValidationPipeline};
//! use serde_json::json;
//!
//! let registry = StrategyRegistry::with_builtins();
//! let strategies = vec![registry.get("citation").unwrap()];
//!
//! let context = ValidationContext::new()
//!     .with_reference_texts(["Paris is the capital of France."]);
//! let response = json!({ "citations": ["Paris is the capital of France"] });
//!
//! let result = ValidationPipeline::default().run(&response, &context, &strategies);
//! assert!(result.all_valid);
//! ```

pub mod context;
pub mod fuzzy;
pub mod pipeline;
pub mod registry;
pub mod result;
pub mod strategy;
pub mod trace;
pub mod validators;

// Re-export main types at crate root
pub use context::{ValidationContext, ATTEMPT_KEY, REFERENCE_TEXTS_KEY};
pub use pipeline::{PipelineMode, PipelineResult, StrategyOutcome, ValidationPipeline};
pub use registry::{
    DiscoveryReport, PluginDefinition, PluginLoadError, RegistryError, StrategyInfo,
    StrategyRegistry,
};
pub use result::ValidationResult;
pub use strategy::{StrategyError, StrategyFactory, ValidationStrategy};
pub use trace::{DebugTracer, TraceError, TraceHandle, ValidationTrace};
