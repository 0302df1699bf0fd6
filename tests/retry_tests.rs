//! Retry Executor Tests
//! Attempt budget, backoff timing, recovery and cancellation

use resiliency_core::{
    AttemptOutcome, BackoffPolicy, Cancelled, ResiliencyObserver, RetriesExhausted, RetryConfig,
    RetryExecutor,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
enum FetchError {
    Transient(u32),
    BadRequest,
    Cancelled(u32),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Transient(attempt) => write!(f, "transient failure on attempt {}", attempt),
            FetchError::BadRequest => write!(f, "bad request"),
            FetchError::Cancelled(attempts) => write!(f, "cancelled after {}", attempts),
        }
    }
}

impl From<Cancelled> for FetchError {
    fn from(c: Cancelled) -> Self {
        FetchError::Cancelled(c.attempts)
    }
}

fn executor(max_attempts: u32) -> RetryExecutor<FetchError> {
    RetryExecutor::new(
        RetryConfig::new(max_attempts)
            .with_name("fetch")
            .with_backoff(BackoffPolicy::new(Duration::from_millis(100), 2.0)),
    )
    .unwrap()
    .with_retry_if(|e: &FetchError| matches!(e, FetchError::Transient(_)))
}

#[derive(Default)]
struct AttemptLog {
    outcomes: Mutex<Vec<(u32, AttemptOutcome)>>,
    recovers: AtomicU32,
}

impl ResiliencyObserver for AttemptLog {
    fn on_attempt(&self, _operation: &str, attempt: u32, _max: u32, outcome: AttemptOutcome, _error: Option<&str>) {
        self.outcomes.lock().unwrap().push((attempt, outcome));
    }

    fn on_recover(&self, _operation: &str, _attempts: u32) {
        self.recovers.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt_without_recover() {
        let retry = executor(3);
        let calls = AtomicU32::new(0);
        let recovers = AtomicU32::new(0);

        let result = retry
            .execute(
                || {
                    let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if attempt < 3 {
                            Err(FetchError::Transient(attempt))
                        } else {
                            Ok("payload")
                        }
                    }
                },
                |_| {
                    recovers.fetch_add(1, Ordering::SeqCst);
                    async { Ok("recovered") }
                },
            )
            .await;

        assert_eq!(result, Ok("payload"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(recovers.load(Ordering::SeqCst), 0);
        assert_eq!(retry.last_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_sleeps_backoff_then_recovers_once() {
        let retry = executor(3);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recovers = AtomicU32::new(0);
        let start = Instant::now();

        let result = retry
            .execute(
                || {
                    let mut calls = calls.lock().unwrap();
                    calls.push(start.elapsed());
                    let attempt = calls.len() as u32;
                    async move { Err::<&str, _>(FetchError::Transient(attempt)) }
                },
                |exhausted: RetriesExhausted<FetchError>| {
                    recovers.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(exhausted.attempts, 3);
                    assert_eq!(exhausted.last_error, FetchError::Transient(3));
                    async { Ok("recovered") }
                },
            )
            .await;

        assert_eq!(result, Ok("recovered"));
        assert_eq!(recovers.load(Ordering::SeqCst), 1);

        // delay(1) = 100ms, delay(2) = 200ms, no sleep after the last attempt
        let calls = calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                Duration::ZERO,
                Duration::from_millis(100),
                Duration::from_millis(300),
            ]
        );
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_propagates_immediately() {
        let retry = executor(5);
        let calls = AtomicU32::new(0);
        let recovers = AtomicU32::new(0);
        let start = Instant::now();

        let result = retry
            .execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<&str, _>(FetchError::BadRequest) }
                },
                |_| {
                    recovers.fetch_add(1, Ordering::SeqCst);
                    async { Ok("recovered") }
                },
            )
            .await;

        assert_eq!(result, Err(FetchError::BadRequest));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(recovers.load(Ordering::SeqCst), 0);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_recovered_when_configured() {
        let retry = RetryExecutor::new(
            RetryConfig::new(5)
                .with_backoff(BackoffPolicy::fixed(Duration::from_millis(10)))
                .with_recover_non_retryable(true),
        )
        .unwrap()
        .with_retry_if(|e: &FetchError| matches!(e, FetchError::Transient(_)));

        let result = retry
            .execute(
                || async { Err::<&str, _>(FetchError::BadRequest) },
                |exhausted| async move {
                    assert_eq!(exhausted.attempts, 1);
                    Ok("recovered")
                },
            )
            .await;

        assert_eq!(result, Ok("recovered"));
        assert_eq!(retry.last_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_failure_propagates_and_is_not_retried() {
        let retry = executor(2);
        let recovers = AtomicU32::new(0);

        let result: Result<&str, FetchError> = retry
            .execute(
                || async { Err(FetchError::Transient(0)) },
                |_| {
                    recovers.fetch_add(1, Ordering::SeqCst);
                    async { Err(FetchError::BadRequest) }
                },
            )
            .await;

        assert_eq!(result, Err(FetchError::BadRequest));
        assert_eq!(recovers.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_budget_never_sleeps() {
        let retry = executor(1);
        let start = Instant::now();

        let result = retry
            .execute(
                || async { Err::<&str, _>(FetchError::Transient(1)) },
                |exhausted| async move {
                    assert_eq!(exhausted.attempts, 1);
                    Ok("recovered")
                },
            )
            .await;

        assert_eq!(result, Ok("recovered"));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff() {
        let retry = Arc::new(executor(5));
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let recovers = Arc::new(AtomicU32::new(0));

        let task = {
            let retry = retry.clone();
            let token = token.clone();
            let calls = calls.clone();
            let recovers = recovers.clone();
            tokio::spawn(async move {
                retry
                    .execute_cancellable(
                        || {
                            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                            async move { Err::<&str, _>(FetchError::Transient(attempt)) }
                        },
                        |_| {
                            recovers.fetch_add(1, Ordering::SeqCst);
                            async { Ok("recovered") }
                        },
                        &token,
                    )
                    .await
            })
        };

        // Attempts at 0ms and 100ms; the sleep before attempt 3 ends at 300ms
        tokio::time::sleep(Duration::from_millis(150)).await;
        token.cancel();

        let result = task.await.unwrap();
        assert_eq!(result, Err(FetchError::Cancelled(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(recovers.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_inflight_attempt() {
        let retry = executor(3);
        let token = CancellationToken::new();
        let canceller = token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = retry
            .execute_cancellable(
                || async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok("too late")
                },
                |_| async { Ok("recovered") },
                &token,
            )
            .await;

        assert_eq!(result, Err(FetchError::Cancelled(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_token_makes_no_attempt() {
        let retry = executor(3);
        let token = CancellationToken::new();
        token.cancel();

        let calls = AtomicU32::new(0);
        let result = retry
            .execute_cancellable(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok("payload") }
                },
                |_| async { Ok("recovered") },
                &token,
            )
            .await;

        assert_eq!(result, Err(FetchError::Cancelled(0)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_receives_attempt_outcomes() {
        let log = Arc::new(AttemptLog::default());
        let retry = executor(3).with_observer(log.clone());

        let _ = retry
            .execute(
                || async { Err::<&str, _>(FetchError::Transient(0)) },
                |_| async { Ok("recovered") },
            )
            .await;

        let outcomes = log.outcomes.lock().unwrap().clone();
        assert_eq!(
            outcomes,
            vec![
                (1, AttemptOutcome::Retrying { delay: Duration::from_millis(100) }),
                (2, AttemptOutcome::Retrying { delay: Duration::from_millis(200) }),
                (3, AttemptOutcome::Exhausted),
            ]
        );
        assert_eq!(log.recovers.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_calls_keep_separate_budgets() {
        let retry = Arc::new(executor(3));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let retry = retry.clone();
                tokio::spawn(async move {
                    let calls = AtomicU32::new(0);
                    let result = retry
                        .execute(
                            || {
                                let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                                async move {
                                    if attempt < 3 {
                                        Err(FetchError::Transient(attempt))
                                    } else {
                                        Ok(attempt)
                                    }
                                }
                            },
                            |_| async { Ok(0) },
                        )
                        .await;
                    (result, calls.load(Ordering::SeqCst))
                })
            })
            .collect();

        for handle in handles {
            let (result, calls) = handle.await.unwrap();
            assert_eq!(result, Ok(3));
            assert_eq!(calls, 3);
        }
    }
}
