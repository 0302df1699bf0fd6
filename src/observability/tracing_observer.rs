//! Structured logging for breaker and retry events

use tracing::{debug, error, info, warn};

use crate::resilience::{AttemptOutcome, CircuitBreakerState, ResiliencyObserver};

/// Forwards resilience events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ResiliencyObserver for TracingObserver {
    fn on_state_transition(&self, name: &str, from: CircuitBreakerState, to: CircuitBreakerState) {
        match to {
            CircuitBreakerState::Open => warn!(
                name = %name,
                from = %from,
                "Circuit breaker opened"
            ),
            CircuitBreakerState::HalfOpen => info!(
                name = %name,
                "Circuit breaker transitioning to half-open"
            ),
            CircuitBreakerState::Closed => info!(
                name = %name,
                from = %from,
                "Circuit breaker closed"
            ),
        }
    }

    fn on_short_circuit(&self, name: &str, state: CircuitBreakerState) {
        debug!(name = %name, state = %state, "Call short-circuited");
    }

    fn on_attempt(
        &self,
        operation: &str,
        attempt: u32,
        max_attempts: u32,
        outcome: AttemptOutcome,
        error: Option<&str>,
    ) {
        match outcome {
            AttemptOutcome::Succeeded if attempt > 1 => debug!(
                operation = operation,
                attempt = attempt,
                "Operation succeeded after retry"
            ),
            AttemptOutcome::Succeeded => {}
            AttemptOutcome::Retrying { delay } => warn!(
                operation = operation,
                attempt = attempt,
                max_attempts = max_attempts,
                error = error.unwrap_or_default(),
                delay_ms = delay.as_millis() as u64,
                "Operation failed, retrying"
            ),
            AttemptOutcome::Exhausted => warn!(
                operation = operation,
                attempt = attempt,
                error = error.unwrap_or_default(),
                "Operation failed after all retries"
            ),
            AttemptOutcome::NonRetryable => warn!(
                operation = operation,
                attempt = attempt,
                error = error.unwrap_or_default(),
                "Operation failed with non-retryable error"
            ),
        }
    }

    fn on_recover(&self, operation: &str, attempts: u32) {
        error!(
            operation = operation,
            attempts = attempts,
            "All retry attempts failed, executing recovery"
        );
    }

    fn on_fallback(&self, name: &str, reason: &str) {
        warn!(name = %name, reason = reason, "Fallback triggered");
    }
}
