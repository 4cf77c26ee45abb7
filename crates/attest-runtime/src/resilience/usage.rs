//! Token usage accounting across attempts.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::providers::TokenUsage;

/// Accumulated model usage for one orchestration or batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    /// Total tokens used
    pub total_tokens: u64,

    /// Prompt/input tokens
    pub prompt_tokens: u64,

    /// Completion/output tokens
    pub completion_tokens: u64,

    /// Model calls that returned a response
    pub llm_calls: u32,

    /// Model calls that failed
    pub failed_calls: u32,
}

impl LlmUsage {
    /// Add token usage from a successful call.
    pub fn add(&mut self, usage: &TokenUsage) {
        self.prompt_tokens += u64::from(usage.prompt_tokens);
        self.completion_tokens += u64::from(usage.completion_tokens);
        self.total_tokens += u64::from(usage.total());
        self.llm_calls += 1;
    }

    pub fn record_failure(&mut self) {
        self.failed_calls += 1;
    }

    /// Fold another usage record into this one.
    pub fn merge(&mut self, other: &LlmUsage) {
        self.total_tokens += other.total_tokens;
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.llm_calls += other.llm_calls;
        self.failed_calls += other.failed_calls;
    }
}

/// Shared usage accumulator for concurrent requests.
#[derive(Debug, Default)]
pub struct UsageTracker {
    usage: RwLock<LlmUsage>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, usage: &LlmUsage) {
        self.usage.write().merge(usage);
    }

    /// Snapshot of the accumulated usage.
    pub fn get_usage(&self) -> LlmUsage {
        self.usage.read().clone()
    }

    pub fn reset(&self) {
        *self.usage.write() = LlmUsage::default();
    }
}
