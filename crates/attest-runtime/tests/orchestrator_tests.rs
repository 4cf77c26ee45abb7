//! Retry orchestration against scripted model clients.
//!
//! Every test runs on paused tokio time, so backoff sleeps and timeouts
//! resolve instantly and deterministically.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};

use attest_core::{StrategyError, ValidationContext, ValidationResult, ValidationStrategy};
use attest_runtime::prompts::FEEDBACK_HEADER;
use attest_runtime::{
    AttemptOutcome, BatchRunner, CancelReason, CancellationToken, ChatMessage, ModelClient,
    ModelResponse, OrchestrationError, ProviderError, ResponseSchema, RetryConfig,
    RetryOrchestrator, RetryRequest, StrategyRef, TokenUsage,
};

#[derive(Clone)]
enum Step {
    Respond(JsonValue),
    Fail(ProviderError),
    Hang,
}

/// Plays a script of steps, repeating the last one once it runs out.
struct ScriptedClient {
    script: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedClient {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let next = self.script.lock().pop_front();
        let mut last = self.last.lock();
        match next {
            Some(step) => {
                *last = Some(step.clone());
                step
            }
            None => last.clone().unwrap_or(Step::Hang),
        }
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _schema: &ResponseSchema,
    ) -> Result<ModelResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(messages.to_vec());

        match self.next_step() {
            Step::Respond(content) => {
                let mut response = ModelResponse::new(content);
                response.usage = TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 4,
                };
                Ok(response)
            }
            Step::Fail(error) => Err(error),
            Step::Hang => std::future::pending().await,
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct AlwaysFail;

impl ValidationStrategy for AlwaysFail {
    fn name(&self) -> &str {
        "always_fail"
    }

    fn validate(
        &self,
        _response: &JsonValue,
        _context: &ValidationContext,
    ) -> Result<ValidationResult, StrategyError> {
        Ok(ValidationResult::fail("never good enough").with_suggestion("Try harder"))
    }
}

struct AlwaysPass;

impl ValidationStrategy for AlwaysPass {
    fn name(&self) -> &str {
        "always_pass"
    }

    fn validate(
        &self,
        _response: &JsonValue,
        _context: &ValidationContext,
    ) -> Result<ValidationResult, StrategyError> {
        Ok(ValidationResult::pass())
    }
}

/// Blocks inside `validate` until released, announcing when it starts.
struct Gate {
    started: tokio::sync::mpsc::UnboundedSender<()>,
    release: Mutex<std::sync::mpsc::Receiver<()>>,
}

impl ValidationStrategy for Gate {
    fn name(&self) -> &str {
        "gate"
    }

    fn validate(
        &self,
        _response: &JsonValue,
        _context: &ValidationContext,
    ) -> Result<ValidationResult, StrategyError> {
        let _ = self.started.send(());
        let _ = self.release.lock().recv();
        Ok(ValidationResult::pass())
    }
}

fn schema() -> ResponseSchema {
    ResponseSchema::new("report", json!({"type": "object"}))
}

fn prompt() -> Vec<ChatMessage> {
    vec![ChatMessage::user("Write the report.")]
}

fn fast_config(max_attempts: u32) -> RetryConfig {
    RetryConfig::new(max_attempts).with_delays(Duration::from_secs(1), 2.0, Duration::from_secs(10))
}

fn requires_title() -> StrategyRef {
    StrategyRef::Configured {
        name: "required_fields".to_string(),
        params: json!({"fields": ["title"]}),
    }
}

#[tokio::test(start_paused = true)]
async fn test_first_attempt_success_regardless_of_budget() {
    for max_attempts in 1..=5 {
        let client = ScriptedClient::new(vec![Step::Respond(json!({"title": "Q3"}))]);
        let orchestrator = RetryOrchestrator::new(client.clone());
        let strategies: Vec<Arc<dyn ValidationStrategy>> = vec![Arc::new(AlwaysPass)];

        let outcome = orchestrator
            .retry_with_validation(prompt(), &schema(), &strategies, &fast_config(max_attempts))
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 1);
        assert_eq!(client.calls(), 1);
        assert_eq!(outcome.response.content, json!({"title": "Q3"}));
        assert_eq!(outcome.usage.total_tokens, 14);
        assert_eq!(outcome.trace.len(), 1);
        assert!(outcome.trace[0].passed());
    }
}

#[tokio::test(start_paused = true)]
async fn test_always_failing_exhausts_with_full_trace() {
    let client = ScriptedClient::new(vec![Step::Respond(json!({"title": "Q3"}))]);
    let orchestrator = RetryOrchestrator::new(client.clone());
    let strategies: Vec<Arc<dyn ValidationStrategy>> = vec![Arc::new(AlwaysFail)];

    let err = orchestrator
        .retry_with_validation(prompt(), &schema(), &strategies, &fast_config(3))
        .await
        .unwrap_err();

    let OrchestrationError::ValidationExhausted(report) = err else {
        panic!("expected ValidationExhausted, got {err:?}");
    };
    assert_eq!(report.attempts, 3);
    assert_eq!(client.calls(), 3);
    assert_eq!(report.history.len(), 3);
    assert_eq!(report.last_response.as_ref().unwrap().content, json!({"title": "Q3"}));
    assert_eq!(report.last_validation().unwrap().failure_count(), 1);

    assert_eq!(report.trace.len(), 3);
    for (i, attempt) in report.trace.iter().enumerate() {
        assert_eq!(attempt.strategy_name, format!("attempt {}", i + 1));
        assert_eq!(attempt.context["attempt"], json!(i + 1));
        assert_eq!(attempt.children.len(), 1);
        assert_eq!(attempt.children[0].strategy_name, "always_fail");
        assert!(!attempt.children[0].passed());
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_attempt_budget() {
    let client = ScriptedClient::new(vec![Step::Respond(json!({}))]);
    let orchestrator = RetryOrchestrator::new(client.clone());
    let strategies: Vec<Arc<dyn ValidationStrategy>> = vec![Arc::new(AlwaysFail)];

    let start = tokio::time::Instant::now();
    let err = orchestrator
        .retry_with_validation(prompt(), &schema(), &strategies, &fast_config(1))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestrationError::ValidationExhausted(_)));
    assert_eq!(err.attempts(), 1);
    assert_eq!(client.calls(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_feedback_appended_between_attempts() {
    let client = ScriptedClient::new(vec![
        Step::Respond(json!({"summary": "no title"})),
        Step::Respond(json!({"title": "Q3", "summary": "fixed"})),
    ]);
    let orchestrator = RetryOrchestrator::new(client.clone());
    let request = RetryRequest::new(prompt(), schema()).strategy(requires_title());

    let outcome = orchestrator
        .run(request, &fast_config(3), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.attempts, 2);

    let seen = client.seen.lock().clone();
    assert_eq!(seen[0], prompt());
    assert_eq!(seen[1].len(), 3);
    assert_eq!(seen[1][1].role, "assistant");
    assert_eq!(
        serde_json::from_str::<JsonValue>(&seen[1][1].content).unwrap(),
        json!({"summary": "no title"})
    );
    assert_eq!(seen[1][2].role, "user");
    assert!(seen[1][2].content.starts_with(FEEDBACK_HEADER));
    assert!(seen[1][2].content.contains("[required_fields]"));
}

#[tokio::test(start_paused = true)]
async fn test_feedback_is_deterministic_across_runs() {
    let mut feedback = Vec::new();
    for _ in 0..2 {
        let client = ScriptedClient::new(vec![
            Step::Respond(json!({})),
            Step::Respond(json!({"title": "ok"})),
        ]);
        let orchestrator = RetryOrchestrator::new(client.clone());
        let request = RetryRequest::new(prompt(), schema()).strategy(requires_title());
        orchestrator
            .run(request, &fast_config(2), &CancellationToken::new())
            .await
            .unwrap();
        feedback.push(client.seen.lock()[1][2].content.clone());
    }
    assert_eq!(feedback[0], feedback[1]);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_follow_schedule() {
    let client = ScriptedClient::new(vec![Step::Respond(json!({}))]);
    let orchestrator = RetryOrchestrator::new(client.clone());
    let strategies: Vec<Arc<dyn ValidationStrategy>> = vec![Arc::new(AlwaysFail)];

    let start = tokio::time::Instant::now();
    orchestrator
        .retry_with_validation(prompt(), &schema(), &strategies, &fast_config(4))
        .await
        .unwrap_err();

    // 1s + 2s + 4s between four attempts
    assert_eq!(start.elapsed(), Duration::from_secs(7));
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_then_success() {
    let client = ScriptedClient::new(vec![
        Step::Fail(ProviderError::HttpError("connection reset".to_string())),
        Step::Respond(json!({"title": "Q3"})),
    ]);
    let orchestrator = RetryOrchestrator::new(client.clone());
    let request = RetryRequest::new(prompt(), schema()).strategy(requires_title());

    let outcome = orchestrator
        .run(request, &fast_config(3), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.usage.failed_calls, 1);
    assert_eq!(outcome.usage.llm_calls, 1);
    assert!(matches!(outcome.history[0].outcome, AttemptOutcome::Transport { .. }));

    let first = outcome.trace[0].result.as_ref().unwrap();
    assert_eq!(
        first.error(),
        Some("transport error: HTTP request failed: connection reset")
    );
    assert!(outcome.trace[0].children.is_empty());
    assert!(outcome.trace[1].passed());

    // Transport failures add no feedback turns
    assert_eq!(client.seen.lock()[1], prompt());
}

#[tokio::test(start_paused = true)]
async fn test_transport_exhaustion_is_call_exhausted() {
    let client = ScriptedClient::new(vec![Step::Fail(ProviderError::RateLimited { retry_after: None })]);
    let orchestrator = RetryOrchestrator::new(client.clone());
    let request = RetryRequest::new(prompt(), schema()).strategy(requires_title());

    let err = orchestrator
        .run(request, &fast_config(3), &CancellationToken::new())
        .await
        .unwrap_err();

    let OrchestrationError::CallExhausted(report) = err else {
        panic!("expected CallExhausted, got {err:?}");
    };
    assert_eq!(report.attempts, 3);
    assert_eq!(client.calls(), 3);
    assert!(report.last_response.is_none());
    assert!(report.last_error.as_deref().unwrap().contains("Rate limit"));
    assert_eq!(report.usage.failed_calls, 3);
    assert_eq!(report.trace.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_after_response_is_validation_exhausted() {
    let client = ScriptedClient::new(vec![
        Step::Respond(json!({})),
        Step::Fail(ProviderError::HttpError("gateway".to_string())),
    ]);
    let orchestrator = RetryOrchestrator::new(client.clone());
    let request = RetryRequest::new(prompt(), schema()).strategy(requires_title());

    let err = orchestrator
        .run(request, &fast_config(2), &CancellationToken::new())
        .await
        .unwrap_err();

    let OrchestrationError::ValidationExhausted(report) = err else {
        panic!("expected ValidationExhausted, got {err:?}");
    };
    assert_eq!(report.last_response.as_ref().unwrap().content, json!({}));
    assert_eq!(report.last_error.as_deref(), Some("HTTP request failed: gateway"));
}

#[tokio::test(start_paused = true)]
async fn test_call_timeout_counts_as_transport_failure() {
    let client = ScriptedClient::new(vec![Step::Hang]);
    let orchestrator = RetryOrchestrator::new(client.clone());
    let config = fast_config(2).with_call_timeout(Duration::from_secs(5));

    let err = orchestrator
        .retry_with_validation(prompt(), &schema(), &[], &config)
        .await
        .unwrap_err();

    let OrchestrationError::CallExhausted(report) = err else {
        panic!("expected CallExhausted, got {err:?}");
    };
    assert_eq!(client.calls(), 2);
    assert!(report.last_error.as_deref().unwrap().starts_with("Timeout"));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_stops_calls() {
    let client = ScriptedClient::new(vec![Step::Respond(json!({}))]);
    let orchestrator = Arc::new(RetryOrchestrator::new(client.clone()));
    let cancel = CancellationToken::new();

    let task = {
        let orchestrator = Arc::clone(&orchestrator);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let request = RetryRequest::new(prompt(), schema()).strategy(requires_title());
            orchestrator.run(request, &fast_config(5), &cancel).await
        })
    };

    // First call done, now inside the 1s backoff
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let err = task.await.unwrap().unwrap_err();
    let OrchestrationError::Cancelled(report) = err else {
        panic!("expected Cancelled, got {err:?}");
    };
    assert_eq!(report.reason, CancelReason::Caller);
    assert_eq!(report.attempts, 1);
    assert_eq!(report.trace.len(), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(client.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_in_flight_call() {
    let client = ScriptedClient::new(vec![Step::Hang]);
    let orchestrator = Arc::new(RetryOrchestrator::new(client.clone()));
    let cancel = CancellationToken::new();

    let task = {
        let orchestrator = Arc::clone(&orchestrator);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            orchestrator
                .run(RetryRequest::new(prompt(), schema()), &fast_config(3), &cancel)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let err = task.await.unwrap().unwrap_err();
    let OrchestrationError::Cancelled(report) = err else {
        panic!("expected Cancelled, got {err:?}");
    };
    assert_eq!(report.attempts, 1);
    assert!(matches!(report.history[0].outcome, AttemptOutcome::Cancelled));
    assert!(!report.trace[0].passed());
    assert_eq!(client.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_slow_validation() {
    let client = ScriptedClient::new(vec![Step::Respond(json!({"title": "t"}))]);
    let orchestrator = Arc::new(RetryOrchestrator::new(client.clone()));
    let cancel = CancellationToken::new();
    let (started_tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel();
    let gate: Arc<dyn ValidationStrategy> = Arc::new(Gate {
        started: started_tx,
        release: Mutex::new(release_rx),
    });

    let task = {
        let orchestrator = Arc::clone(&orchestrator);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let request = RetryRequest::new(prompt(), schema()).strategy(StrategyRef::Instance(gate));
            orchestrator.run(request, &fast_config(3), &cancel).await
        })
    };

    // The strategy is blocked; this runtime thread must still be free
    started_rx.recv().await.unwrap();
    cancel.cancel();

    let err = task.await.unwrap().unwrap_err();
    release_tx.send(()).unwrap();

    let OrchestrationError::Cancelled(report) = err else {
        panic!("expected Cancelled, got {err:?}");
    };
    assert_eq!(report.reason, CancelReason::Caller);
    assert_eq!(report.attempts, 1);
    assert!(matches!(report.history[0].outcome, AttemptOutcome::Cancelled));
    assert!(!report.trace[0].passed());
    assert_eq!(client.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pre_cancelled_token_makes_no_call() {
    let client = ScriptedClient::new(vec![Step::Respond(json!({}))]);
    let orchestrator = RetryOrchestrator::new(client.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = orchestrator
        .run(RetryRequest::new(prompt(), schema()), &fast_config(3), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::Cancelled(_)));
    assert_eq!(client.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_overall_timeout_cancels() {
    let client = ScriptedClient::new(vec![Step::Respond(json!({}))]);
    let orchestrator = RetryOrchestrator::new(client.clone());
    let strategies: Vec<Arc<dyn ValidationStrategy>> = vec![Arc::new(AlwaysFail)];
    let config = fast_config(10).with_timeout(Duration::from_secs(2));

    let err = orchestrator
        .retry_with_validation(prompt(), &schema(), &strategies, &config)
        .await
        .unwrap_err();

    // Calls at 0s and 1s, deadline hits during the 2s backoff
    let OrchestrationError::Cancelled(report) = err else {
        panic!("expected Cancelled, got {err:?}");
    };
    assert_eq!(report.reason, CancelReason::Timeout(Duration::from_secs(2)));
    assert_eq!(report.attempts, 2);
    assert_eq!(client.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_strategy_name_makes_no_call() {
    let client = ScriptedClient::new(vec![Step::Respond(json!({}))]);
    let orchestrator = RetryOrchestrator::new(client.clone());
    let request = RetryRequest::new(prompt(), schema()).strategy("nonexistent");

    let err = orchestrator
        .run(request, &fast_config(3), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::Registry(_)));
    assert_eq!(client.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_debug_mode_still_returns_outcome() {
    let client = ScriptedClient::new(vec![Step::Respond(json!({"title": "Q3"}))]);
    let orchestrator = RetryOrchestrator::new(client);
    let request = RetryRequest::new(prompt(), schema()).strategy(requires_title());

    let outcome = orchestrator
        .run(request, &fast_config(2).with_debug(true), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.attempts, 1);
}

/// Sleeps on every call and records the peak number of concurrent calls.
struct SlowClient {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl ModelClient for SlowClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _schema: &ResponseSchema,
    ) -> Result<ModelResponse, ProviderError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(ModelResponse::new(json!({"title": messages[0].content})))
    }

    fn name(&self) -> &str {
        "slow"
    }
}

#[tokio::test(start_paused = true)]
async fn test_batch_respects_concurrency_and_order() {
    let client = Arc::new(SlowClient {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let runner = BatchRunner::new(Arc::new(RetryOrchestrator::new(client.clone())), 3);

    let requests: Vec<_> = (0..10)
        .map(|i| {
            RetryRequest::new(vec![ChatMessage::user(format!("doc {i}"))], schema())
                .strategy(requires_title())
        })
        .collect();
    let batch = runner
        .run(requests, &fast_config(2), &CancellationToken::new())
        .await;

    assert_eq!(client.peak.load(Ordering::SeqCst), 3);
    assert_eq!(batch.summary.succeeded, 10);
    for (i, result) in batch.results.iter().enumerate() {
        let outcome = result.as_ref().unwrap();
        assert_eq!(outcome.response.content["title"], json!(format!("doc {i}")));
    }
}

#[tokio::test(start_paused = true)]
async fn test_batch_failures_are_independent() {
    let client = ScriptedClient::new(vec![
        Step::Respond(json!({"title": "first"})),
        Step::Respond(json!({})),
    ]);
    let runner = BatchRunner::new(Arc::new(RetryOrchestrator::new(client)), 1);
    let requests = vec![
        RetryRequest::new(prompt(), schema()).strategy(requires_title()),
        RetryRequest::new(prompt(), schema()).strategy(requires_title()),
    ];

    let batch = runner
        .run(requests, &fast_config(2), &CancellationToken::new())
        .await;

    assert!(batch.results[0].is_ok());
    assert!(matches!(
        batch.results[1],
        Err(OrchestrationError::ValidationExhausted(_))
    ));
    assert_eq!(batch.summary.succeeded, 1);
    assert_eq!(batch.summary.failed, 1);
}
