//! Resilience patterns for attest-runtime.
//!
//! This module provides:
//! - Capped exponential backoff between attempts
//! - Cooperative cancellation for sleeps and in-flight calls
//! - Token usage accounting across attempts

mod backoff;
mod cancel;
mod usage;

pub use backoff::BackoffSchedule;
pub use cancel::CancellationToken;
pub use usage::{LlmUsage, UsageTracker};
