//! Bounded-concurrency batches of orchestration requests.
//!
//! Requests run independently: one request exhausting its retries does not
//! affect the others. Results come back in input order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::config::RetryConfig;
use crate::orchestrator::{OrchestrationError, RetryOrchestrator, RetryOutcome, RetryRequest};
use crate::resilience::{CancellationToken, LlmUsage, UsageTracker};

/// Aggregate view of one finished batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub usage: LlmUsage,
}

/// Results of a batch, in input order.
#[derive(Debug)]
pub struct BatchResult {
    pub results: Vec<Result<RetryOutcome, OrchestrationError>>,
    pub summary: BatchSummary,
}

/// Runs many requests through one orchestrator.
pub struct BatchRunner {
    orchestrator: Arc<RetryOrchestrator>,
    max_concurrency: usize,
    usage: UsageTracker,
}

impl BatchRunner {
    /// `max_concurrency` of zero is treated as one.
    pub fn new(orchestrator: Arc<RetryOrchestrator>, max_concurrency: usize) -> Self {
        Self {
            orchestrator,
            max_concurrency: max_concurrency.max(1),
            usage: UsageTracker::new(),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Usage accumulated across every batch run so far.
    pub fn usage(&self) -> LlmUsage {
        self.usage.get_usage()
    }

    /// Run every request, at most `max_concurrency` at a time.
    ///
    /// Cancelling the token stops in-flight requests and fails the ones not
    /// yet started with `Cancelled`.
    pub async fn run(
        &self,
        requests: Vec<RetryRequest>,
        config: &RetryConfig,
        cancel: &CancellationToken,
    ) -> BatchResult {
        let started_at = Utc::now();
        let total = requests.len();
        tracing::info!(total, max_concurrency = self.max_concurrency, "starting batch");

        let results: Vec<_> = stream::iter(requests)
            .map(|request| self.orchestrator.run(request, config, cancel))
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut usage = LlmUsage::default();
        let mut succeeded = 0;
        for result in &results {
            match result {
                Ok(outcome) => {
                    succeeded += 1;
                    usage.merge(&outcome.usage);
                }
                Err(e) => {
                    if let Some(spent) = e.usage() {
                        usage.merge(spent);
                    }
                }
            }
        }
        self.usage.record(&usage);

        let summary = BatchSummary {
            started_at,
            finished_at: Utc::now(),
            total,
            succeeded,
            failed: total - succeeded,
            usage,
        };
        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            tokens = summary.usage.total_tokens,
            "batch finished"
        );

        BatchResult { results, summary }
    }
}
