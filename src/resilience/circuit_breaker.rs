//! Circuit Breaker Implementation
//! Prevents cascading failures by failing fast when a downstream operation is unhealthy

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use super::observer::{NoopObserver, ResiliencyObserver};
use crate::error::{CircuitOpenError, ConfigError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitBreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitBreakerState::Closed => "closed",
            CircuitBreakerState::Open => "open",
            CircuitBreakerState::HalfOpen => "half_open",
        }
    }
}

impl Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to a real call that fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// The failure is returned to the caller, including on the call that trips
    /// the breaker. The fallback only answers short-circuited calls.
    #[default]
    Propagate,
    /// Every failure is handed to the fallback as [`Trigger::Failed`].
    Fallback,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub name: String,
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub failure_mode: FailureMode,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            failure_mode: FailureMode::Propagate,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        if self.cooldown.is_zero() {
            return Err(ConfigError::ZeroCooldown);
        }
        Ok(())
    }
}

/// Why the fallback is being invoked.
#[derive(Debug)]
pub enum Trigger<E> {
    /// The breaker rejected the call; the operation never ran.
    CircuitOpen(CircuitOpenError),
    /// The operation ran and failed (only with [`FailureMode::Fallback`]).
    Failed(E),
}

impl<E: Display> Display for Trigger<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::CircuitOpen(open) => write!(f, "{}", open),
            Trigger::Failed(e) => write!(f, "{}", e),
        }
    }
}

/// Point-in-time view of a breaker, for health endpoints and logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitBreakerState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,
    pub calls_permitted: u64,
    pub calls_rejected: u64,
    pub successes: u64,
    pub failures: u64,
    pub times_opened: u64,
}

struct BreakerInner {
    state: CircuitBreakerState,
    failure_count: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    // Bumped on every transition; outcomes from older permits don't move the state.
    generation: u64,
    last_failure: Option<String>,
    calls_permitted: u64,
    calls_rejected: u64,
    successes: u64,
    failures: u64,
    times_opened: u64,
}

type Transition = (CircuitBreakerState, CircuitBreakerState);

impl BreakerInner {
    fn transition(&mut self, to: CircuitBreakerState) -> Option<Transition> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        self.generation += 1;
        match to {
            CircuitBreakerState::Open => {
                self.opened_at = Some(Instant::now());
                self.trial_in_flight = false;
                self.times_opened += 1;
            }
            CircuitBreakerState::HalfOpen => {
                self.failure_count = 0;
                self.trial_in_flight = false;
            }
            CircuitBreakerState::Closed => {
                self.failure_count = 0;
                self.opened_at = None;
                self.trial_in_flight = false;
            }
        }
        Some((from, to))
    }
}

enum Admission {
    Permitted { generation: u64, trial: bool },
    Rejected(CircuitOpenError),
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    observer: Arc<dyn ResiliencyObserver>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        Self::with_observer(config, Arc::new(NoopObserver))
    }

    pub fn with_observer(
        config: CircuitBreakerConfig,
        observer: Arc<dyn ResiliencyObserver>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitBreakerState::Closed,
                failure_count: 0,
                opened_at: None,
                trial_in_flight: false,
                generation: 0,
                last_failure: None,
                calls_permitted: 0,
                calls_rejected: 0,
                successes: 0,
                failures: 0,
                times_opened: 0,
            }),
            observer,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state. An OPEN breaker whose cooldown has elapsed still reports
    /// OPEN until the next call arrives to probe it.
    pub fn state(&self) -> CircuitBreakerState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        let retry_after_ms = match (inner.state, inner.opened_at) {
            (CircuitBreakerState::Open, Some(opened_at)) => Some(
                self.config
                    .cooldown
                    .saturating_sub(opened_at.elapsed())
                    .as_millis() as u64,
            ),
            _ => None,
        };
        BreakerSnapshot {
            name: self.config.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold,
            cooldown_ms: self.config.cooldown.as_millis() as u64,
            retry_after_ms,
            last_failure: inner.last_failure.clone(),
            calls_permitted: inner.calls_permitted,
            calls_rejected: inner.calls_rejected,
            successes: inner.successes,
            failures: inner.failures,
            times_opened: inner.times_opened,
        }
    }

    /// Force the breaker back to CLOSED.
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.lock();
            inner.failure_count = 0;
            inner.transition(CircuitBreakerState::Closed)
        };
        self.notify(transition);
    }

    /// Run `operation` through the breaker, answering with `fallback` when the
    /// call is short-circuited.
    pub async fn execute<T, E, F, Fut, FB, FBFut>(&self, operation: F, fallback: FB) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce(Trigger<E>) -> FBFut,
        FBFut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let permit = match self.acquire() {
            Ok(permit) => permit,
            Err(open) => return self.reject(open, fallback).await,
        };

        match operation().await {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(e) => {
                permit.fail(&e);
                self.surface(e, fallback).await
            }
        }
    }

    /// Like [`execute`](Self::execute) without a fallback: a short-circuited
    /// call returns the open condition converted into the caller's error type.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display + From<CircuitOpenError>,
    {
        let permit = self.acquire().map_err(E::from)?;

        match operation().await {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(e) => {
                permit.fail(&e);
                Err(e)
            }
        }
    }

    /// Answer a short-circuited call.
    pub(crate) async fn reject<T, E, FB, FBFut>(&self, open: CircuitOpenError, fallback: FB) -> Result<T, E>
    where
        FB: FnOnce(Trigger<E>) -> FBFut,
        FBFut: Future<Output = Result<T, E>>,
    {
        self.observer.on_fallback(&self.config.name, "circuit open");
        fallback(Trigger::CircuitOpen(open)).await
    }

    /// Answer a real failure according to the configured [`FailureMode`].
    pub(crate) async fn surface<T, E, FB, FBFut>(&self, error: E, fallback: FB) -> Result<T, E>
    where
        FB: FnOnce(Trigger<E>) -> FBFut,
        FBFut: Future<Output = Result<T, E>>,
    {
        match self.config.failure_mode {
            FailureMode::Propagate => Err(error),
            FailureMode::Fallback => {
                self.observer.on_fallback(&self.config.name, "operation failed");
                fallback(Trigger::Failed(error)).await
            }
        }
    }

    pub(crate) fn acquire(&self) -> Result<Permit<'_>, CircuitOpenError> {
        let (admission, transition) = {
            let mut inner = self.lock();
            let mut transition = None;

            if inner.state == CircuitBreakerState::Open {
                let elapsed = inner
                    .opened_at
                    .map(|opened_at| opened_at.elapsed())
                    .unwrap_or(self.config.cooldown);
                if elapsed >= self.config.cooldown {
                    transition = inner.transition(CircuitBreakerState::HalfOpen);
                }
            }

            let state = inner.state;
            let admission = match state {
                CircuitBreakerState::Closed => Admission::Permitted {
                    generation: inner.generation,
                    trial: false,
                },
                CircuitBreakerState::HalfOpen if !inner.trial_in_flight => {
                    inner.trial_in_flight = true;
                    Admission::Permitted {
                        generation: inner.generation,
                        trial: true,
                    }
                }
                CircuitBreakerState::HalfOpen => Admission::Rejected(self.open_error(&inner, Duration::ZERO)),
                CircuitBreakerState::Open => {
                    let remaining = inner
                        .opened_at
                        .map(|opened_at| self.config.cooldown.saturating_sub(opened_at.elapsed()))
                        .unwrap_or_default();
                    Admission::Rejected(self.open_error(&inner, remaining))
                }
            };

            match admission {
                Admission::Permitted { .. } => inner.calls_permitted += 1,
                Admission::Rejected(_) => inner.calls_rejected += 1,
            }
            (admission, transition)
        };

        self.notify(transition);

        match admission {
            Admission::Permitted { generation, trial } => Ok(Permit {
                breaker: self,
                generation,
                trial,
                settled: false,
            }),
            Admission::Rejected(open) => {
                self.observer.on_short_circuit(&self.config.name, self.state());
                Err(open)
            }
        }
    }

    fn open_error(&self, inner: &BreakerInner, retry_after: Duration) -> CircuitOpenError {
        CircuitOpenError {
            name: self.config.name.clone(),
            retry_after,
            last_failure: inner.last_failure.clone(),
        }
    }

    fn on_success(&self, generation: u64) {
        let transition = {
            let mut inner = self.lock();
            inner.successes += 1;
            let state = inner.state;
            if inner.generation != generation {
                None
            } else {
                match state {
                    CircuitBreakerState::Closed => {
                        inner.failure_count = 0;
                        None
                    }
                    CircuitBreakerState::HalfOpen => inner.transition(CircuitBreakerState::Closed),
                    CircuitBreakerState::Open => None,
                }
            }
        };
        self.notify(transition);
    }

    fn on_failure(&self, generation: u64, error: String) {
        let transition = {
            let mut inner = self.lock();
            inner.failures += 1;
            inner.last_failure = Some(error);
            let state = inner.state;
            if inner.generation != generation {
                None
            } else {
                match state {
                    CircuitBreakerState::Closed => {
                        inner.failure_count += 1;
                        if inner.failure_count >= self.config.failure_threshold {
                            inner.transition(CircuitBreakerState::Open)
                        } else {
                            None
                        }
                    }
                    CircuitBreakerState::HalfOpen => inner.transition(CircuitBreakerState::Open),
                    CircuitBreakerState::Open => None,
                }
            }
        };
        self.notify(transition);
    }

    // Trial future dropped before it finished: reopen so a later caller can probe.
    fn on_abandoned_trial(&self, generation: u64) {
        let transition = {
            let mut inner = self.lock();
            if inner.generation == generation && inner.state == CircuitBreakerState::HalfOpen {
                inner.transition(CircuitBreakerState::Open)
            } else {
                None
            }
        };
        self.notify(transition);
    }

    fn notify(&self, transition: Option<Transition>) {
        if let Some((from, to)) = transition {
            self.observer.on_state_transition(&self.config.name, from, to);
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Admission to run one real call. Must be settled with the call's outcome;
/// dropping an unsettled trial permit reopens the breaker.
pub(crate) struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl Permit<'_> {
    pub(crate) fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.generation);
    }

    pub(crate) fn fail<E: Display>(mut self, error: &E) {
        self.settled = true;
        self.breaker.on_failure(self.generation, error.to_string());
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.on_abandoned_trial(self.generation);
        }
    }
}
