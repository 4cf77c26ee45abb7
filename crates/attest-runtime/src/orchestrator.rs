//! Validate-and-retry orchestration.
//!
//! The orchestrator drives one logical request through an explicit state
//! machine:
//!
//! ```text
//! Calling -> Validating -> Success
//!    ^           |
//!    |           v
//!    +------ Retrying ------> Exhausted
//! ```
//!
//! - Calling: one model call, bounded by `call_timeout`
//! - Validating: the pipeline runs every strategy over the response
//! - Retrying: feedback is appended and the backoff delay elapses
//!
//! Transport failures and validation failures share one attempt budget and
//! one backoff schedule. Cancellation and the overall timeout are raced
//! against the model call, the validation run and the backoff sleep, so
//! they take effect immediately. Strategies run on tokio's blocking pool.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::time::Instant;

use attest_core::{
    DebugTracer, PipelineMode, PipelineResult, RegistryError, StrategyRegistry, ValidationContext,
    ValidationPipeline, ValidationResult, ValidationStrategy, ValidationTrace, ATTEMPT_KEY,
};

use crate::config::{ConfigError, RetryConfig, RuntimeConfig};
use crate::prompts::build_feedback;
use crate::providers::{ChatMessage, ModelClient, ModelResponse, ProviderError, ResponseSchema};
use crate::resilience::{BackoffSchedule, CancellationToken, LlmUsage};

/// Why an orchestration stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The caller's token was cancelled
    Caller,
    /// The overall timeout elapsed
    Timeout(#[serde(with = "millis")] Duration),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Caller => write!(f, "cancelled by caller"),
            CancelReason::Timeout(d) => write!(f, "timed out after {}", humantime::format_duration(*d)),
        }
    }
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u128(duration.as_millis())
    }
}

/// What happened in one attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The model call failed
    Transport { error: String },
    /// A response was obtained and validated
    Validated { result: PipelineResult },
    /// Cancelled while the call was in flight
    Cancelled,
}

/// One entry of the per-attempt history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt: u32,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

/// Everything known when the attempt budget ran out.
#[derive(Debug, Clone, Serialize)]
pub struct ExhaustionReport {
    pub attempts: u32,
    pub history: Vec<AttemptRecord>,
    pub trace: Vec<ValidationTrace>,
    /// Last response obtained, if any
    pub last_response: Option<ModelResponse>,
    /// Last transport error, if any
    pub last_error: Option<String>,
    pub usage: LlmUsage,
}

impl ExhaustionReport {
    /// Validation results of the final validated attempt.
    pub fn last_validation(&self) -> Option<&PipelineResult> {
        self.history.iter().rev().find_map(|record| match &record.outcome {
            AttemptOutcome::Validated { result } => Some(result),
            _ => None,
        })
    }
}

/// State at the moment of cancellation.
#[derive(Debug, Clone, Serialize)]
pub struct CancelledReport {
    pub reason: CancelReason,
    pub attempts: u32,
    pub history: Vec<AttemptRecord>,
    pub trace: Vec<ValidationTrace>,
    pub usage: LlmUsage,
}

/// Errors from the orchestrator.
#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error(
        "model call failed on all {} attempt(s): {}",
        .0.attempts,
        .0.last_error.as_deref().unwrap_or("unknown error")
    )]
    CallExhausted(Box<ExhaustionReport>),

    #[error("response still failed validation after {} attempt(s)", .0.attempts)]
    ValidationExhausted(Box<ExhaustionReport>),

    #[error("orchestration {} after {} attempt(s)", .0.reason, .0.attempts)]
    Cancelled(Box<CancelledReport>),

    #[error("Orchestrator not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid retry configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Strategy resolution failed: {0}")]
    Registry(#[from] RegistryError),
}

impl OrchestrationError {
    /// Trace recorded before the error, when there is one.
    pub fn trace(&self) -> Option<&[ValidationTrace]> {
        match self {
            Self::CallExhausted(r) | Self::ValidationExhausted(r) => Some(&r.trace),
            Self::Cancelled(r) => Some(&r.trace),
            _ => None,
        }
    }

    /// Attempts made before the error.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::CallExhausted(r) | Self::ValidationExhausted(r) => r.attempts,
            Self::Cancelled(r) => r.attempts,
            _ => 0,
        }
    }

    pub fn usage(&self) -> Option<&LlmUsage> {
        match self {
            Self::CallExhausted(r) | Self::ValidationExhausted(r) => Some(&r.usage),
            Self::Cancelled(r) => Some(&r.usage),
            _ => None,
        }
    }
}

/// A validated response.
#[derive(Debug, Clone, Serialize)]
pub struct RetryOutcome {
    pub response: ModelResponse,
    /// Attempts used, including the successful one
    pub attempts: u32,
    pub history: Vec<AttemptRecord>,
    pub trace: Vec<ValidationTrace>,
    pub usage: LlmUsage,
}

/// A strategy given directly or by registry name.
#[derive(Clone)]
pub enum StrategyRef {
    Instance(Arc<dyn ValidationStrategy>),
    Named(String),
    Configured { name: String, params: JsonValue },
}

impl fmt::Debug for StrategyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(s) => f.debug_tuple("Instance").field(&s.name()).finish(),
            Self::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Self::Configured { name, params } => f
                .debug_struct("Configured")
                .field("name", name)
                .field("params", params)
                .finish(),
        }
    }
}

impl From<Arc<dyn ValidationStrategy>> for StrategyRef {
    fn from(strategy: Arc<dyn ValidationStrategy>) -> Self {
        Self::Instance(strategy)
    }
}

impl From<&str> for StrategyRef {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for StrategyRef {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

/// One logical request.
#[derive(Debug, Clone)]
pub struct RetryRequest {
    pub messages: Vec<ChatMessage>,
    pub schema: ResponseSchema,
    pub strategies: Vec<StrategyRef>,
    pub context: ValidationContext,
}

impl RetryRequest {
    pub fn new(messages: Vec<ChatMessage>, schema: ResponseSchema) -> Self {
        Self {
            messages,
            schema,
            strategies: Vec::new(),
            context: ValidationContext::new(),
        }
    }

    pub fn strategy(mut self, strategy: impl Into<StrategyRef>) -> Self {
        self.strategies.push(strategy.into());
        self
    }

    pub fn strategies<I, S>(mut self, strategies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StrategyRef>,
    {
        self.strategies.extend(strategies.into_iter().map(Into::into));
        self
    }

    pub fn context(mut self, context: ValidationContext) -> Self {
        self.context = context;
        self
    }
}

/// States of the retry loop.
#[derive(Debug)]
enum RetryState {
    Calling,
    Validating(ModelResponse),
    Retrying,
    Success(ModelResponse),
    Exhausted,
}

/// Result of the calling phase.
enum CallResult {
    Response(ModelResponse),
    Transport(ProviderError),
    Cancelled(CancelReason),
}

/// Result of the validating phase.
enum ValidateResult {
    Done(PipelineResult, DebugTracer),
    Cancelled(CancelReason),
}

/// Mutable bookkeeping for one orchestration call.
struct Run {
    tracer: DebugTracer,
    history: Vec<AttemptRecord>,
    usage: LlmUsage,
    attempt: u32,
    last_response: Option<ModelResponse>,
    last_error: Option<ProviderError>,
}

impl Run {
    fn new() -> Self {
        Self {
            tracer: DebugTracer::new(),
            history: Vec::new(),
            usage: LlmUsage::default(),
            attempt: 0,
            last_response: None,
            last_error: None,
        }
    }

    /// Close the open attempt trace, if any.
    fn close_attempt(&mut self, result: ValidationResult) {
        if let Some(handle) = self.tracer.current() {
            if let Err(e) = self.tracer.end_trace(handle, result) {
                tracing::warn!(error = %e, "failed to close attempt trace");
            }
        }
    }

    fn finish(self, debug_mode: bool) -> (Vec<AttemptRecord>, Vec<ValidationTrace>, LlmUsage) {
        if debug_mode {
            self.tracer.print_summary();
        }
        (self.history, self.tracer.export(), self.usage)
    }
}

/// Drives model calls through validation and retries.
pub struct RetryOrchestrator {
    client: Arc<dyn ModelClient>,
    registry: Arc<StrategyRegistry>,
    pipeline: ValidationPipeline,
}

impl RetryOrchestrator {
    /// Create an orchestrator with the built-in strategies registered.
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Self {
            client,
            registry: Arc::new(StrategyRegistry::with_builtins()),
            pipeline: ValidationPipeline::default(),
        }
    }

    /// Create an orchestrator from runtime configuration.
    ///
    /// Discovers `plugin_dir` when set. Broken plugin files are logged and
    /// skipped; a missing directory is an error.
    pub fn from_config(
        client: Arc<dyn ModelClient>,
        config: &RuntimeConfig,
    ) -> Result<Self, OrchestrationError> {
        config.validate()?;
        let registry = StrategyRegistry::with_builtins().with_strict(config.strict_registry);
        if let Some(dir) = &config.plugin_dir {
            let report = registry.discover(dir)?;
            tracing::info!(
                registered = report.registered.len(),
                errors = report.errors.len(),
                "discovered strategy plugins"
            );
        }

        Self::builder()
            .client(client)
            .registry(Arc::new(registry))
            .pipeline_mode(config.pipeline_mode)
            .build()
    }

    pub fn builder() -> RetryOrchestratorBuilder {
        RetryOrchestratorBuilder::new()
    }

    pub fn registry(&self) -> &Arc<StrategyRegistry> {
        &self.registry
    }

    pub fn pipeline_mode(&self) -> PipelineMode {
        self.pipeline.mode()
    }

    /// Call, validate and retry until the response passes every strategy.
    ///
    /// Runs with an empty context and no external cancellation.
    pub async fn retry_with_validation(
        &self,
        messages: Vec<ChatMessage>,
        schema: &ResponseSchema,
        strategies: &[Arc<dyn ValidationStrategy>],
        config: &RetryConfig,
    ) -> Result<RetryOutcome, OrchestrationError> {
        let request = RetryRequest::new(messages, schema.clone())
            .strategies(strategies.iter().cloned());
        self.run(request, config, &CancellationToken::new()).await
    }

    /// Run one request.
    ///
    /// Strategy names are resolved through the registry before any model
    /// call is made.
    pub async fn run(
        &self,
        request: RetryRequest,
        config: &RetryConfig,
        cancel: &CancellationToken,
    ) -> Result<RetryOutcome, OrchestrationError> {
        config.validate()?;
        let strategies = self.resolve(&request.strategies)?;

        let RetryRequest {
            mut messages,
            schema,
            context,
            ..
        } = request;

        let deadline = config.timeout.map(|t| (Instant::now() + t, t));
        let mut schedule = BackoffSchedule::new(config);
        let mut run = Run::new();
        let mut state = RetryState::Calling;

        loop {
            tracing::debug!(attempt = run.attempt, state = ?StateName::from(&state), "retry state");

            state = match state {
                RetryState::Calling => {
                    run.attempt += 1;
                    let mut trace_context = context.as_map().clone();
                    trace_context.insert(ATTEMPT_KEY.to_string(), JsonValue::from(run.attempt));
                    run.tracer.start_trace(format!("attempt {}", run.attempt), trace_context);

                    match self.call(&messages, &schema, config, cancel, deadline).await {
                        CallResult::Response(response) => {
                            run.usage.add(&response.usage);
                            RetryState::Validating(response)
                        }
                        CallResult::Transport(error) => {
                            tracing::warn!(
                                attempt = run.attempt,
                                client = self.client.name(),
                                error = %error,
                                "model call failed"
                            );
                            run.usage.record_failure();
                            run.close_attempt(ValidationResult::fail(format!("transport error: {error}")));
                            run.history.push(AttemptRecord {
                                attempt: run.attempt,
                                outcome: AttemptOutcome::Transport {
                                    error: error.to_string(),
                                },
                            });
                            run.last_error = Some(error);

                            if run.attempt < config.max_attempts {
                                RetryState::Retrying
                            } else {
                                RetryState::Exhausted
                            }
                        }
                        CallResult::Cancelled(reason) => {
                            run.close_attempt(ValidationResult::fail(format!("cancelled: {reason}")));
                            run.history.push(AttemptRecord {
                                attempt: run.attempt,
                                outcome: AttemptOutcome::Cancelled,
                            });
                            return Err(Self::cancelled(run, reason, config));
                        }
                    }
                }

                RetryState::Validating(response) => {
                    let mut attempt_context = context.clone();
                    attempt_context.insert(ATTEMPT_KEY, run.attempt);

                    let result = match self
                        .validate(&response.content, attempt_context, &strategies, cancel, deadline)
                        .await
                    {
                        ValidateResult::Done(result, tracer) => {
                            run.tracer.absorb(tracer);
                            result
                        }
                        ValidateResult::Cancelled(reason) => {
                            run.close_attempt(ValidationResult::fail(format!("cancelled: {reason}")));
                            run.history.push(AttemptRecord {
                                attempt: run.attempt,
                                outcome: AttemptOutcome::Cancelled,
                            });
                            return Err(Self::cancelled(run, reason, config));
                        }
                    };
                    run.close_attempt(result.summary_result());

                    let failures = result.failure_count();
                    let feedback = (!result.all_valid).then(|| build_feedback(&result));
                    run.history.push(AttemptRecord {
                        attempt: run.attempt,
                        outcome: AttemptOutcome::Validated { result },
                    });

                    match feedback {
                        None => RetryState::Success(response),
                        Some(feedback) => {
                            tracing::debug!(
                                attempt = run.attempt,
                                failures,
                                "response failed validation"
                            );
                            if run.attempt < config.max_attempts {
                                messages.push(ChatMessage::assistant(response.content.to_string()));
                                messages.push(ChatMessage::user(feedback));
                            }
                            run.last_response = Some(response);

                            if run.attempt < config.max_attempts {
                                RetryState::Retrying
                            } else {
                                RetryState::Exhausted
                            }
                        }
                    }
                }

                RetryState::Retrying => {
                    let delay = schedule.next().unwrap_or(config.max_delay);
                    tracing::warn!(
                        attempt = run.attempt,
                        max_attempts = config.max_attempts,
                        delay = ?delay,
                        "retrying after failed attempt"
                    );

                    if let Some(reason) = Self::sleep(delay, cancel, deadline).await {
                        return Err(Self::cancelled(run, reason, config));
                    }
                    RetryState::Calling
                }

                RetryState::Success(response) => {
                    if run.attempt > 1 {
                        tracing::info!(attempts = run.attempt, "response passed validation after retries");
                    }
                    let attempts = run.attempt;
                    let (history, trace, usage) = run.finish(config.debug_mode);
                    return Ok(RetryOutcome {
                        response,
                        attempts,
                        history,
                        trace,
                        usage,
                    });
                }

                RetryState::Exhausted => {
                    return Err(Self::exhausted(run, config));
                }
            };
        }
    }

    fn resolve(&self, refs: &[StrategyRef]) -> Result<Vec<Arc<dyn ValidationStrategy>>, RegistryError> {
        refs.iter()
            .map(|r| match r {
                StrategyRef::Instance(strategy) => Ok(Arc::clone(strategy)),
                StrategyRef::Named(name) => self.registry.get(name),
                StrategyRef::Configured { name, params } => self.registry.get_with(name, params),
            })
            .collect()
    }

    /// One model call, raced against cancellation and the overall deadline.
    async fn call(
        &self,
        messages: &[ChatMessage],
        schema: &ResponseSchema,
        config: &RetryConfig,
        cancel: &CancellationToken,
        deadline: Option<(Instant, Duration)>,
    ) -> CallResult {
        if cancel.is_cancelled() {
            return CallResult::Cancelled(CancelReason::Caller);
        }

        let call = async {
            match config.call_timeout {
                Some(limit) => tokio::time::timeout(limit, self.client.complete(messages, schema))
                    .await
                    .unwrap_or(Err(ProviderError::Timeout(limit))),
                None => self.client.complete(messages, schema).await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => CallResult::Cancelled(CancelReason::Caller),
            reason = wait_deadline(deadline) => CallResult::Cancelled(reason),
            result = call => match result {
                Ok(response) => CallResult::Response(response),
                Err(error) => CallResult::Transport(error),
            },
        }
    }

    /// Run the pipeline on the blocking pool, raced against cancellation
    /// and the overall deadline.
    ///
    /// Strategy traces are recorded into a fresh tracer that the caller
    /// absorbs under the open attempt. An abandoned pipeline finishes in
    /// the background and its result is dropped.
    async fn validate(
        &self,
        content: &JsonValue,
        context: ValidationContext,
        strategies: &[Arc<dyn ValidationStrategy>],
        cancel: &CancellationToken,
        deadline: Option<(Instant, Duration)>,
    ) -> ValidateResult {
        if cancel.is_cancelled() {
            return ValidateResult::Cancelled(CancelReason::Caller);
        }

        let pipeline = self.pipeline;
        let content = content.clone();
        let strategies = strategies.to_vec();
        let task = tokio::task::spawn_blocking(move || {
            let mut tracer = DebugTracer::new();
            let result = pipeline.run_traced(&content, &context, &strategies, &mut tracer);
            (result, tracer)
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => ValidateResult::Cancelled(CancelReason::Caller),
            reason = wait_deadline(deadline) => ValidateResult::Cancelled(reason),
            joined = task => match joined {
                Ok((result, tracer)) => ValidateResult::Done(result, tracer),
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => {
                    tracing::warn!(error = %e, "validation task did not complete");
                    ValidateResult::Cancelled(CancelReason::Caller)
                }
            },
        }
    }

    /// Backoff sleep. Returns the reason when interrupted.
    async fn sleep(
        delay: Duration,
        cancel: &CancellationToken,
        deadline: Option<(Instant, Duration)>,
    ) -> Option<CancelReason> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Some(CancelReason::Caller),
            reason = wait_deadline(deadline) => Some(reason),
            _ = tokio::time::sleep(delay) => None,
        }
    }

    fn cancelled(run: Run, reason: CancelReason, config: &RetryConfig) -> OrchestrationError {
        tracing::warn!(attempts = run.attempt, reason = %reason, "orchestration cancelled");
        let attempts = run.attempt;
        let (history, trace, usage) = run.finish(config.debug_mode);
        OrchestrationError::Cancelled(Box::new(CancelledReport {
            reason,
            attempts,
            history,
            trace,
            usage,
        }))
    }

    fn exhausted(mut run: Run, config: &RetryConfig) -> OrchestrationError {
        let attempts = run.attempt;
        let last_response = run.last_response.take();
        let last_error = run.last_error.take().map(|e| e.to_string());
        let validation = last_response.is_some();
        let (history, trace, usage) = run.finish(config.debug_mode);

        let report = Box::new(ExhaustionReport {
            attempts,
            history,
            trace,
            last_response,
            last_error,
            usage,
        });

        if validation {
            tracing::error!(attempts, "retry budget exhausted on validation failures");
            OrchestrationError::ValidationExhausted(report)
        } else {
            tracing::error!(attempts, "retry budget exhausted on transport failures");
            OrchestrationError::CallExhausted(report)
        }
    }
}

async fn wait_deadline(deadline: Option<(Instant, Duration)>) -> CancelReason {
    match deadline {
        Some((at, limit)) => {
            tokio::time::sleep_until(at).await;
            CancelReason::Timeout(limit)
        }
        None => std::future::pending().await,
    }
}

/// Payload-free state name for logs.
#[derive(Debug)]
enum StateName {
    Calling,
    Validating,
    Retrying,
    Success,
    Exhausted,
}

impl From<&RetryState> for StateName {
    fn from(state: &RetryState) -> Self {
        match state {
            RetryState::Calling => Self::Calling,
            RetryState::Validating(_) => Self::Validating,
            RetryState::Retrying => Self::Retrying,
            RetryState::Success(_) => Self::Success,
            RetryState::Exhausted => Self::Exhausted,
        }
    }
}

/// Builder for RetryOrchestrator.
pub struct RetryOrchestratorBuilder {
    client: Option<Arc<dyn ModelClient>>,
    registry: Option<Arc<StrategyRegistry>>,
    mode: PipelineMode,
}

impl RetryOrchestratorBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            client: None,
            registry: None,
            mode: PipelineMode::RunAll,
        }
    }

    /// Set the model client.
    pub fn client(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Use a shared registry instead of the built-ins.
    pub fn registry(mut self, registry: Arc<StrategyRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn pipeline_mode(mut self, mode: PipelineMode) -> Self {
        self.mode = mode;
        self
    }

    /// Build the orchestrator.
    pub fn build(self) -> Result<RetryOrchestrator, OrchestrationError> {
        let client = self
            .client
            .ok_or_else(|| OrchestrationError::NotConfigured("No model client set".to_string()))?;

        Ok(RetryOrchestrator {
            client,
            registry: self
                .registry
                .unwrap_or_else(|| Arc::new(StrategyRegistry::with_builtins())),
            pipeline: ValidationPipeline::new(self.mode),
        })
    }
}

impl Default for RetryOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StaticClient(JsonValue);

    #[async_trait]
    impl ModelClient for StaticClient {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _schema: &ResponseSchema,
        ) -> Result<ModelResponse, ProviderError> {
            Ok(ModelResponse::new(self.0.clone()))
        }

        fn name(&self) -> &str {
            "static"
        }
    }

    fn schema() -> ResponseSchema {
        ResponseSchema::new("answer", serde_json::json!({"type": "object"}))
    }

    #[test]
    fn test_builder_requires_client() {
        assert!(matches!(
            RetryOrchestrator::builder().build(),
            Err(OrchestrationError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_builder_sets_mode() {
        let orchestrator = RetryOrchestrator::builder()
            .client(Arc::new(StaticClient(serde_json::json!({}))))
            .pipeline_mode(PipelineMode::ShortCircuit)
            .build()
            .unwrap();
        assert_eq!(orchestrator.pipeline_mode(), PipelineMode::ShortCircuit);
        assert!(orchestrator.registry().contains("citation"));
    }

    #[tokio::test]
    async fn test_unknown_strategy_fails_before_call() {
        let orchestrator = RetryOrchestrator::new(Arc::new(StaticClient(serde_json::json!({}))));
        let request = RetryRequest::new(vec![ChatMessage::user("hi")], schema()).strategy("nonexistent");

        let err = orchestrator
            .run(request, &RetryConfig::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::Registry(RegistryError::UnknownStrategy { .. })
        ));
        assert_eq!(err.attempts(), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let orchestrator = RetryOrchestrator::new(Arc::new(StaticClient(serde_json::json!({}))));
        let err = orchestrator
            .retry_with_validation(vec![], &schema(), &[], &RetryConfig::new(0))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::Config(_)));
    }

    #[tokio::test]
    async fn test_named_strategies_resolved() {
        let orchestrator = RetryOrchestrator::new(Arc::new(StaticClient(
            serde_json::json!({"title": "Report"}),
        )));
        let request = RetryRequest::new(vec![ChatMessage::user("hi")], schema()).strategy(
            StrategyRef::Configured {
                name: "required_fields".to_string(),
                params: serde_json::json!({"fields": ["title"]}),
            },
        );

        let outcome = orchestrator
            .run(request, &RetryConfig::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.trace[0].children[0].strategy_name, "required_fields");
    }

    #[test]
    fn test_cancel_reason_display() {
        assert_eq!(CancelReason::Caller.to_string(), "cancelled by caller");
        assert_eq!(
            CancelReason::Timeout(Duration::from_secs(2)).to_string(),
            "timed out after 2s"
        );
    }

    #[test]
    fn test_attempt_record_serializes_flat() {
        let record = AttemptRecord {
            attempt: 2,
            outcome: AttemptOutcome::Transport {
                error: "boom".to_string(),
            },
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"attempt": 2, "outcome": "transport", "error": "boom"})
        );
    }
}
