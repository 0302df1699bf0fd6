//! Retry with Exponential Backoff
//! Handles transient failures with a bounded attempt budget and a recovery path

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::backoff::BackoffPolicy;
use super::observer::{AttemptOutcome, NoopObserver, ResiliencyObserver};
use crate::error::{Cancelled, ConfigError, RetriesExhausted};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Label reported to the observer.
    pub name: String,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    /// Hand non-retryable failures to `recover` instead of propagating them.
    pub recover_non_retryable: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            recover_non_retryable: false,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_recover_non_retryable(mut self, enabled: bool) -> Self {
        self.recover_non_retryable = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroMaxAttempts);
        }
        self.backoff.validate()
    }
}

type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Why the attempt loop stopped without a value.
pub(crate) enum Stop<E> {
    Exhausted(RetriesExhausted<E>),
    NonRetryable { attempts: u32, error: E },
}

impl<E> Stop<E> {
    pub(crate) fn error(&self) -> &E {
        match self {
            Stop::Exhausted(exhausted) => &exhausted.last_error,
            Stop::NonRetryable { error, .. } => error,
        }
    }

    pub(crate) fn into_error(self) -> E {
        match self {
            Stop::Exhausted(exhausted) => exhausted.into_last_error(),
            Stop::NonRetryable { error, .. } => error,
        }
    }
}

pub struct RetryExecutor<E> {
    config: RetryConfig,
    retry_if: Option<RetryPredicate<E>>,
    observer: Arc<dyn ResiliencyObserver>,
    last_attempts: AtomicU32,
}

impl<E> std::fmt::Debug for RetryExecutor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("config", &self.config)
            .field("last_attempts", &self.last_attempts.load(Ordering::Relaxed))
            .finish()
    }
}

impl<E: Display> RetryExecutor<E> {
    /// Executor that retries every failure.
    pub fn new(config: RetryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            retry_if: None,
            observer: Arc::new(NoopObserver),
            last_attempts: AtomicU32::new(0),
        })
    }

    /// Only failures matching `predicate` are retried; others stop the loop at once.
    pub fn with_retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Some(Arc::new(predicate));
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ResiliencyObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.config.backoff
    }

    /// Attempts made by the most recently finished call.
    pub fn last_attempts(&self) -> u32 {
        self.last_attempts.load(Ordering::Relaxed)
    }

    pub fn is_retryable(&self, error: &E) -> bool {
        self.retry_if.as_ref().map_or(true, |retry_if| retry_if(error))
    }

    /// Run `operation` until it succeeds or the attempt budget is spent, then
    /// answer with `recover`.
    pub async fn execute<T, F, Fut, R, RFut>(&self, operation: F, recover: R) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnOnce(RetriesExhausted<E>) -> RFut,
        RFut: Future<Output = Result<T, E>>,
    {
        match self.run(operation).await {
            Ok(value) => Ok(value),
            Err(stop) => self.resolve(stop, recover).await,
        }
    }

    /// Like [`execute`](Self::execute), but stops as soon as `cancel` fires,
    /// interrupting any in-flight attempt or backoff sleep. Recover is not called.
    pub async fn execute_cancellable<T, F, Fut, R, RFut>(
        &self,
        operation: F,
        recover: R,
        cancel: &CancellationToken,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnOnce(RetriesExhausted<E>) -> RFut,
        RFut: Future<Output = Result<T, E>>,
        E: From<Cancelled>,
    {
        let attempts = AtomicU32::new(0);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            outcome = self.run_counted(operation, &attempts) => Some(outcome),
        };

        match outcome {
            Some(Ok(value)) => Ok(value),
            Some(Err(stop)) => self.resolve(stop, recover).await,
            None => {
                let attempts = attempts.load(Ordering::Relaxed);
                self.last_attempts.store(attempts, Ordering::Relaxed);
                Err(E::from(Cancelled { attempts }))
            }
        }
    }

    /// Retry without a recovery path; exhaustion returns the last error.
    pub async fn retry<T, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(operation).await.map_err(Stop::into_error)
    }

    /// Hand an exhausted loop to `recover`. Non-retryable failures propagate
    /// unless the config routes them to `recover` as well.
    pub(crate) async fn resolve<T, R, RFut>(&self, stop: Stop<E>, recover: R) -> Result<T, E>
    where
        R: FnOnce(RetriesExhausted<E>) -> RFut,
        RFut: Future<Output = Result<T, E>>,
    {
        let exhausted = match stop {
            Stop::Exhausted(exhausted) => exhausted,
            Stop::NonRetryable { attempts, error } if self.config.recover_non_retryable => {
                RetriesExhausted {
                    attempts,
                    last_error: error,
                }
            }
            Stop::NonRetryable { error, .. } => return Err(error),
        };

        self.observer.on_recover(&self.config.name, exhausted.attempts);
        recover(exhausted).await
    }

    pub(crate) async fn run<T, F, Fut>(&self, operation: F) -> Result<T, Stop<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = AtomicU32::new(0);
        self.run_counted(operation, &attempts).await
    }

    // `attempts` tracks progress so a cancelled caller can report it.
    async fn run_counted<T, F, Fut>(&self, mut operation: F, attempts: &AtomicU32) -> Result<T, Stop<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.config.max_attempts;
        let mut attempt = 0;

        loop {
            attempt += 1;
            attempts.store(attempt, Ordering::Relaxed);

            let error = match operation().await {
                Ok(value) => {
                    self.last_attempts.store(attempt, Ordering::Relaxed);
                    self.observer.on_attempt(
                        &self.config.name,
                        attempt,
                        max_attempts,
                        AttemptOutcome::Succeeded,
                        None,
                    );
                    return Ok(value);
                }
                Err(e) => e,
            };

            let message = error.to_string();

            if !self.is_retryable(&error) {
                self.last_attempts.store(attempt, Ordering::Relaxed);
                self.observer.on_attempt(
                    &self.config.name,
                    attempt,
                    max_attempts,
                    AttemptOutcome::NonRetryable,
                    Some(&message),
                );
                return Err(Stop::NonRetryable {
                    attempts: attempt,
                    error,
                });
            }

            if attempt >= max_attempts {
                self.last_attempts.store(attempt, Ordering::Relaxed);
                self.observer.on_attempt(
                    &self.config.name,
                    attempt,
                    max_attempts,
                    AttemptOutcome::Exhausted,
                    Some(&message),
                );
                return Err(Stop::Exhausted(RetriesExhausted {
                    attempts: attempt,
                    last_error: error,
                }));
            }

            let delay = self.config.backoff.delay(attempt);
            self.observer.on_attempt(
                &self.config.name,
                attempt,
                max_attempts,
                AttemptOutcome::Retrying { delay },
                Some(&message),
            );

            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_last_attempts_tracks_latest_call() {
        let executor = RetryExecutor::<String>::new(
            RetryConfig::new(4).with_backoff(BackoffPolicy::fixed(Duration::from_millis(10))),
        )
        .unwrap();

        let mut calls = 0;
        let result = executor
            .retry(|| {
                calls += 1;
                let n = calls;
                async move {
                    if n < 2 {
                        Err("not yet".to_string())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(executor.last_attempts(), 2);

        let result: Result<u32, String> = executor.retry(|| async { Err("down".to_string()) }).await;
        assert_eq!(result.unwrap_err(), "down");
        assert_eq!(executor.last_attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_non_retryable_error() {
        let executor = RetryExecutor::<String>::new(RetryConfig::new(5))
            .unwrap()
            .with_retry_if(|e: &String| e.starts_with("transient"));

        let mut calls = 0;
        let result: Result<(), String> = executor
            .retry(|| {
                calls += 1;
                async { Err("invalid input".to_string()) }
            })
            .await;

        assert_eq!(result, Err("invalid input".to_string()));
        assert_eq!(calls, 1);
        assert_eq!(executor.last_attempts(), 1);
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let err = RetryExecutor::<String>::new(RetryConfig::new(0)).unwrap_err();
        assert_eq!(err, ConfigError::ZeroMaxAttempts);
    }

    #[test]
    fn test_predicate_classifies_errors() {
        let executor = RetryExecutor::<String>::new(RetryConfig::default())
            .unwrap()
            .with_retry_if(|e: &String| e.starts_with("transient"));

        assert!(executor.is_retryable(&"transient: timeout".to_string()));
        assert!(!executor.is_retryable(&"invalid input".to_string()));
    }
}
