//! Retry with exponential backoff and jitter.
//!
//! Wraps a handler call in an attempt loop that consults the classifier for
//! retry decisions and the circuit breaker registry for admission. Backoff
//! sleeps use `tokio::time::sleep`, so a caller-side deadline cancels both
//! the in-flight call and any pending sleep.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use mcp_types_rs::{ErrorCode, ExecutionError};

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::classifier::{ErrorClassifier, FaultKind};
use crate::fault::Fault;

/// Configuration for a retry executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retries after the initial attempt
    pub max_retries: u32,
    /// Base duration for exponential backoff
    pub base_delay: Duration,
    /// Multiplier applied per attempt
    pub backoff_factor: f64,
    /// Cap on any single backoff delay
    pub max_delay: Duration,
    /// Whether to jitter delays to avoid synchronized retry storms
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

/// Executes operations against an upstream with retry, backoff, and circuit
/// breaker protection.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    classifier: ErrorClassifier,
    breakers: Arc<CircuitBreakerRegistry>,
}

impl RetryExecutor {
    pub fn new(
        config: RetryConfig,
        classifier: ErrorClassifier,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        Self {
            config,
            classifier,
            breakers,
        }
    }

    /// The breaker registry this executor reports into.
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Pre-jitter delay before retry number `attempt` (0-based).
    /// Monotonically non-decreasing and capped at `max_delay`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let exp = self
            .config
            .base_delay
            .mul_f64(self.config.backoff_factor.powi(attempt as i32));
        exp.min(self.config.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.config.jitter {
            return delay;
        }
        // Uniform factor in [0.75, 1.25]
        let factor = rand::thread_rng().gen_range(0.75..=1.25);
        delay.mul_f64(factor)
    }

    /// Runs `operation` against `upstream_id` with retries.
    ///
    /// Only operations marked idempotent are retried; a non-idempotent
    /// operation gets exactly one attempt regardless of fault kind, since a
    /// blind replay could duplicate its side effect. The circuit check does
    /// not consume an attempt.
    pub async fn execute<F, Fut, T>(
        &self,
        upstream_id: &str,
        idempotent: bool,
        operation: F,
    ) -> Result<T, ExecutionError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, Fault>>,
    {
        let max_retries = if idempotent { self.config.max_retries } else { 0 };
        let mut attempt: u32 = 0;

        loop {
            if !self.breakers.can_execute(upstream_id) {
                counter!("retry_circuit_rejections", 1, "upstream" => upstream_id.to_string());
                return Err(self.circuit_open_error(upstream_id));
            }

            match operation().await {
                Ok(value) => {
                    self.breakers.record_success(upstream_id);
                    if attempt > 0 {
                        info!(
                            upstream = %upstream_id,
                            attempt = %attempt,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(fault) => {
                    let kind = self.classifier.classify(&fault);
                    self.breakers.record_failure(upstream_id);
                    counter!("retry_failures", 1, "upstream" => upstream_id.to_string());

                    if !kind.is_retryable() {
                        // Permanent and partial faults fail fast, no sleep
                        return Err(permanent_error(&fault, kind));
                    }

                    if attempt >= max_retries {
                        warn!(
                            upstream = %upstream_id,
                            attempts = %(attempt + 1),
                            error = %fault,
                            "Giving up after retries"
                        );
                        return Err(exhausted_error(upstream_id, &fault, kind, attempt + 1));
                    }

                    let delay = self.jittered(self.delay_before(attempt));
                    debug!(
                        upstream = %upstream_id,
                        attempt = %attempt,
                        max_retries = %max_retries,
                        backoff_ms = %delay.as_millis(),
                        error = %fault,
                        "Retrying after error"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn circuit_open_error(&self, upstream_id: &str) -> ExecutionError {
        let mut err = ExecutionError::new(
            ErrorCode::ServiceUnavailable,
            format!("upstream `{}` is unavailable (circuit open)", upstream_id),
        )
        .detail("upstream", upstream_id)
        .detail("reason", "circuit_open");

        if let Some(remaining) = self.breakers.time_until_retry(upstream_id) {
            err = err.detail("retry_after_seconds", remaining.as_secs_f64());
        }
        err
    }
}

/// Maps a non-retryable fault to its caller-facing error.
fn permanent_error(fault: &Fault, kind: FaultKind) -> ExecutionError {
    match fault {
        Fault::NotFound(message) => ExecutionError::new(ErrorCode::NotFound, message.clone()),
        Fault::Forbidden(message) => ExecutionError::new(ErrorCode::Forbidden, message.clone()),
        Fault::InvalidArgument { field, message } => {
            ExecutionError::new(ErrorCode::InvalidInput, format!("invalid `{}`: {}", field, message))
                .detail("field", field)
        }
        Fault::Partial { succeeded, failed } => ExecutionError::new(
            ErrorCode::PartialFailure,
            format!(
                "{} of {} items succeeded",
                succeeded.len(),
                succeeded.len() + failed.len()
            ),
        )
        .detail("succeeded", succeeded)
        .detail("failed", failed),
        _ => {
            ExecutionError::new(ErrorCode::InternalError, fault.to_string()).detail("kind", format!("{:?}", kind))
        }
    }
}

/// Maps a retryable fault that outlived its retry budget.
fn exhausted_error(upstream_id: &str, fault: &Fault, kind: FaultKind, attempts: u32) -> ExecutionError {
    let code = match kind {
        FaultKind::Timeout => ErrorCode::Timeout,
        _ => ErrorCode::ServiceUnavailable,
    };
    ExecutionError::new(
        code,
        format!(
            "operation against `{}` failed after {} attempts exhausted: {}",
            upstream_id, attempts, fault
        ),
    )
    .detail("upstream", upstream_id)
    .detail("attempts", attempts)
    .detail("reason", "retries_exhausted")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn fast_executor(max_retries: u32) -> RetryExecutor {
        let config = RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(5),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(50),
            jitter: false,
        };
        RetryExecutor::new(
            config,
            ErrorClassifier::default(),
            Arc::new(CircuitBreakerRegistry::default()),
        )
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let executor = fast_executor(3);
        let result = executor
            .execute("api", true, || async { Ok::<_, Fault>(42) })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        // Connection resets 3 times, then succeeds on the 4th call
        let executor = fast_executor(5);
        let calls = Arc::new(AtomicU32::new(0));

        let calls_clone = Arc::clone(&calls);
        let result = executor
            .execute("api", true, move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                        Err(Fault::connection_reset("peer closed"))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // Exactly one success recorded, on the final attempt, and it
        // settled the breaker
        assert_eq!(executor.breakers().success_count("api"), 1);
        assert_eq!(executor.breakers().state("api"), CircuitState::Closed);
        assert_eq!(executor.breakers().failure_count("api"), 0);
    }

    #[tokio::test]
    async fn test_permanent_fault_single_attempt_no_sleep() {
        let executor = fast_executor(3);
        let calls = Arc::new(AtomicU32::new(0));

        let started = Instant::now();
        let calls_clone = Arc::clone(&calls);
        let result: Result<i32, _> = executor
            .execute("api", true, move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Fault::invalid_argument("limit", "must be positive"))
                }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert!(!err.retryable);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Fail-fast path never reaches the backoff sleep
        assert!(started.elapsed() < Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_exhausted_retries() {
        let executor = fast_executor(2);
        let calls = Arc::new(AtomicU32::new(0));

        let calls_clone = Arc::clone(&calls);
        let result: Result<i32, _> = executor
            .execute("api", true, move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Fault::connection_reset("still down"))
                }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.code, ErrorCode::ServiceUnavailable);
        assert!(!err.retryable);
        assert!(err.message.contains("attempts exhausted"));
        // Initial attempt + 2 retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_faults_surface_timeout_code() {
        let executor = fast_executor(1);
        let result: Result<i32, _> = executor
            .execute("api", true, || async {
                Err(Fault::deadline_exceeded("db query"))
            })
            .await;
        assert_eq!(result.unwrap_err().code, ErrorCode::Timeout);
    }

    #[tokio::test]
    async fn test_non_idempotent_never_retried() {
        let executor = fast_executor(5);
        let calls = Arc::new(AtomicU32::new(0));

        let calls_clone = Arc::clone(&calls);
        let result: Result<i32, _> = executor
            .execute("api", false, move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Fault::connection_reset("flaky"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_without_attempt() {
        let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
        }));
        breakers.record_failure("api");

        let executor = RetryExecutor::new(
            RetryConfig::default(),
            ErrorClassifier::default(),
            breakers,
        );

        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        let result: Result<i32, _> = executor
            .execute("api", true, move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.code, ErrorCode::ServiceUnavailable);
        assert_eq!(err.details.get("upstream").and_then(|v| v.as_str()), Some("api"));
        assert_eq!(
            err.details.get("reason").and_then(|v| v.as_str()),
            Some("circuit_open")
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_partial_failure_carries_item_detail() {
        let executor = fast_executor(3);
        let result: Result<i32, _> = executor
            .execute("api", true, || async {
                Err(Fault::Partial {
                    succeeded: vec![serde_json::json!("a"), serde_json::json!("b")],
                    failed: vec![serde_json::json!("c")],
                })
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.code, ErrorCode::PartialFailure);
        assert_eq!(
            err.details.get("succeeded").and_then(|v| v.as_array()).map(|a| a.len()),
            Some(2)
        );
        assert_eq!(
            err.details.get("failed").and_then(|v| v.as_array()).map(|a| a.len()),
            Some(1)
        );
    }

    #[test]
    fn test_backoff_monotonic_and_bounded() {
        let executor = fast_executor(3);
        let config = RetryConfig {
            max_retries: 10,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: false,
        };
        let executor = RetryExecutor::new(
            config,
            ErrorClassifier::default(),
            Arc::clone(executor.breakers()),
        );

        let mut previous = Duration::ZERO;
        for attempt in 0..10 {
            let delay = executor.delay_before(attempt);
            assert!(delay >= previous, "delay must not decrease");
            assert!(delay <= Duration::from_secs(30), "delay must be capped");
            previous = delay;
        }
        assert_eq!(executor.delay_before(0), Duration::from_secs(1));
        assert_eq!(executor.delay_before(1), Duration::from_secs(2));
        assert_eq!(executor.delay_before(2), Duration::from_secs(4));
        assert_eq!(executor.delay_before(10), Duration::from_secs(30));
    }
}
