//! Error Types
//! Configuration errors plus the synthetic conditions handed to fallback/recover

use std::time::Duration;
use thiserror::Error;

/// Invalid configuration, rejected when a component is constructed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("failure_threshold must be at least 1")]
    ZeroFailureThreshold,

    #[error("cooldown must be greater than zero")]
    ZeroCooldown,

    #[error("max_attempts must be at least 1")]
    ZeroMaxAttempts,

    #[error("backoff multiplier must be a finite value >= 1.0, got {0}")]
    InvalidMultiplier(f64),

    #[error("max_delay ({max_delay:?}) is shorter than initial_delay ({initial_delay:?})")]
    MaxDelayBelowInitial {
        initial_delay: Duration,
        max_delay: Duration,
    },

    #[error("protected call has neither a retry nor a circuit breaker layer")]
    NoLayers,

    #[error("protected call has neither a recover nor a fallback handler")]
    MissingHandler,

    #[error("circuit breaker layer requires a fallback handler")]
    MissingFallback,

    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },
}

/// The breaker refused to dispatch the call.
///
/// Handed to the fallback as [`Trigger::CircuitOpen`](crate::Trigger::CircuitOpen);
/// `execute` never returns it on its own.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit breaker '{name}' is open, retry after {retry_after:?}")]
pub struct CircuitOpenError {
    pub name: String,
    /// Remaining cooldown. Zero when rejected because a half-open trial is in flight.
    pub retry_after: Duration,
    pub last_failure: Option<String>,
}

/// Every attempt failed with a retryable error.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("all {attempts} attempts failed: {last_error}")]
pub struct RetriesExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl<E> RetriesExhausted<E> {
    pub fn into_last_error(self) -> E {
        self.last_error
    }
}

/// The caller cancelled the call while it was retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled after {attempts} attempt(s)")]
pub struct Cancelled {
    pub attempts: u32,
}
