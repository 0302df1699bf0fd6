//! Observer hook for breaker transitions and retry attempts.
//!
//! The breaker and retry executor never log on their own; they report events
//! here and the embedding application decides what to do with them.

use std::time::Duration;

use super::circuit_breaker::CircuitBreakerState;

/// Outcome of a single retry attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    /// Failed and another attempt follows after `delay`.
    Retrying { delay: Duration },
    /// Failed with a retryable error and the attempt budget is spent.
    Exhausted,
    /// Failed with an error the retry predicate rejected.
    NonRetryable,
}

/// Receives events from [`CircuitBreaker`](super::CircuitBreaker) and
/// [`RetryExecutor`](super::RetryExecutor). All methods default to no-ops.
pub trait ResiliencyObserver: Send + Sync {
    fn on_state_transition(&self, _name: &str, _from: CircuitBreakerState, _to: CircuitBreakerState) {}

    /// A call was answered by the fallback without reaching the operation.
    fn on_short_circuit(&self, _name: &str, _state: CircuitBreakerState) {}

    fn on_attempt(&self, _operation: &str, _attempt: u32, _max_attempts: u32, _outcome: AttemptOutcome, _error: Option<&str>) {}

    fn on_recover(&self, _operation: &str, _attempts: u32) {}

    fn on_fallback(&self, _name: &str, _reason: &str) {}
}

/// Observer that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ResiliencyObserver for NoopObserver {}
