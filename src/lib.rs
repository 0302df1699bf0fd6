//! Resiliency Core - Circuit Breaker and Retry for unreliable downstream calls
//!
//! Two independent building blocks plus a thin composition layer:
//! - [`CircuitBreaker`]: CLOSED → OPEN → HALF_OPEN → CLOSED, short-circuiting to a
//!   fallback while open
//! - [`RetryExecutor`]: bounded attempts with exponential backoff, then recover
//! - [`Resilience`] / [`ProtectedCall`]: retry inside, breaker outside
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use resiliency_core::{
//!     BackoffPolicy, CircuitBreaker, CircuitBreakerConfig, Resilience, RetryConfig, RetryExecutor,
//! };
//!
//! # async fn run() -> anyhow::Result<()> {
//! let breaker = Arc::new(CircuitBreaker::new(
//!     CircuitBreakerConfig::new("inventory").with_failure_threshold(3),
//! )?);
//! let retry = Arc::new(RetryExecutor::<String>::new(
//!     RetryConfig::new(3).with_backoff(BackoffPolicy::new(Duration::from_millis(100), 2.0)),
//! )?);
//! let resilience = Resilience::new(breaker, retry);
//!
//! let stock = resilience
//!     .execute(
//!         || async { Ok::<u32, String>(42) },
//!         |_exhausted| async { Ok(0) },
//!         |_trigger| async { Ok(0) },
//!     )
//!     .await;
//! assert_eq!(stock, Ok(42));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod resilience;

pub use config::ResiliencyConfig;
pub use error::{Cancelled, CircuitOpenError, ConfigError, RetriesExhausted};
pub use resilience::{
    AttemptOutcome, BackoffPolicy, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerState, FailureMode, NoopObserver, ProtectedCall, ProtectedCallBuilder,
    Resilience, ResiliencyObserver, RetryConfig, RetryExecutor, Trigger,
};
