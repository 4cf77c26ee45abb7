//! # attest-runtime
//!
//! Async validate-and-retry orchestration for structured model output.
//!
//! `attest-core` decides whether a response is acceptable. This crate calls
//! the model, runs the validation pipeline over each response, feeds the
//! failures back as corrective messages and retries with exponential
//! backoff until the response passes or the attempt budget runs out.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use attest_runtime::{ChatMessage, ResponseSchema, RetryConfig, RetryOrchestrator, RetryRequest};
//!
//! let orchestrator = RetryOrchestrator::new(Arc::new(my_client));
//! let request = RetryRequest::new(
//!     vec![ChatMessage::user("Summarise the report with citations.")],
//!     ResponseSchema::new("summary", schema),
//! )
//! .strategy("citation");
//!
//! let outcome = orchestrator
//!     .run(request, &RetryConfig::new(3), &CancellationToken::new())
//!     .await?;
//! println!("passed after {} attempt(s)", outcome.attempts);
//! ```
//!
//! The model itself sits behind [`ModelClient`]; no provider
//! implementations ship with this crate.

pub mod batch;
pub mod config;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod resilience;

pub use batch::{BatchResult, BatchRunner, BatchSummary};
pub use config::{ConfigError, RetryConfig, RuntimeConfig};
pub use orchestrator::{
    AttemptOutcome, AttemptRecord, CancelReason, CancelledReport, ExhaustionReport,
    OrchestrationError, RetryOrchestrator, RetryOrchestratorBuilder, RetryOutcome, RetryRequest,
    StrategyRef,
};
pub use prompts::build_feedback;
pub use providers::{
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ModelClient, ModelResponse,
    ProviderClient, ProviderError, ResponseSchema, TokenUsage,
};
pub use resilience::{BackoffSchedule, CancellationToken, LlmUsage, UsageTracker};
