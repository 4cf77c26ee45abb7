//! Runs an ordered list of strategies against one response.
//!
//! By default every strategy runs, so the caller gets the full list of
//! corrections at once. A strategy that returns `Err` or panics is turned
//! into a failing result and the remaining strategies still run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::context::ValidationContext;
use crate::result::ValidationResult;
use crate::strategy::ValidationStrategy;
use crate::trace::DebugTracer;

/// How the pipeline reacts to a failing strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Run every strategy and aggregate
    #[default]
    RunAll,
    /// Stop after the first failure
    ShortCircuit,
}

/// Result of one strategy within a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyOutcome {
    pub strategy_name: String,
    pub result: ValidationResult,
}

/// Aggregated pipeline result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub all_valid: bool,
    /// Per-strategy results, in execution order
    pub results: Vec<StrategyOutcome>,
}

impl PipelineResult {
    /// Failing outcomes, in execution order.
    pub fn failures(&self) -> impl Iterator<Item = &StrategyOutcome> {
        self.results.iter().filter(|o| !o.result.is_valid())
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    /// One-line summary used as the result of an attempt trace.
    pub fn summary_result(&self) -> ValidationResult {
        if self.all_valid {
            return ValidationResult::pass();
        }
        let names: Vec<&str> = self.failures().map(|o| o.strategy_name.as_str()).collect();
        ValidationResult::fail(format!(
            "{} of {} strategies failed: {}",
            names.len(),
            self.results.len(),
            names.join(", ")
        ))
    }
}

/// Ordered strategy runner.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationPipeline {
    mode: PipelineMode,
}

impl ValidationPipeline {
    pub fn new(mode: PipelineMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    /// Run strategies in order.
    pub fn run(
        &self,
        response: &JsonValue,
        context: &ValidationContext,
        strategies: &[Arc<dyn ValidationStrategy>],
    ) -> PipelineResult {
        self.execute(response, context, strategies, None)
    }

    /// Run strategies in order, recording one child trace per strategy
    /// under the tracer's current node.
    pub fn run_traced(
        &self,
        response: &JsonValue,
        context: &ValidationContext,
        strategies: &[Arc<dyn ValidationStrategy>],
        tracer: &mut DebugTracer,
    ) -> PipelineResult {
        self.execute(response, context, strategies, Some(tracer))
    }

    fn execute(
        &self,
        response: &JsonValue,
        context: &ValidationContext,
        strategies: &[Arc<dyn ValidationStrategy>],
        mut tracer: Option<&mut DebugTracer>,
    ) -> PipelineResult {
        let mut results = Vec::with_capacity(strategies.len());
        let mut all_valid = true;

        for strategy in strategies {
            let name = strategy.name().to_string();
            let handle = tracer
                .as_deref_mut()
                .map(|t| t.start_trace(name.clone(), context.as_map().clone()));

            let result = run_one(strategy.as_ref(), response, context);
            tracing::debug!(strategy = %name, valid = result.is_valid(), "strategy finished");

            if let (Some(tracer), Some(handle)) = (tracer.as_deref_mut(), handle) {
                if let Err(e) = tracer.end_trace(handle, result.clone()) {
                    tracing::warn!(strategy = %name, error = %e, "failed to close strategy trace");
                }
            }

            let failed = !result.is_valid();
            all_valid &= !failed;
            results.push(StrategyOutcome {
                strategy_name: name,
                result,
            });

            if failed && self.mode == PipelineMode::ShortCircuit {
                break;
            }
        }

        PipelineResult { all_valid, results }
    }
}

fn run_one(
    strategy: &dyn ValidationStrategy,
    response: &JsonValue,
    context: &ValidationContext,
) -> ValidationResult {
    match catch_unwind(AssertUnwindSafe(|| strategy.validate(response, context))) {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            tracing::warn!(strategy = strategy.name(), error = %e, "strategy returned an error");
            ValidationResult::fail(format!("strategy execution error: {e}"))
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            tracing::warn!(strategy = strategy.name(), error = %message, "strategy panicked");
            ValidationResult::fail(format!("strategy execution error: {message}"))
        }
    }
}
