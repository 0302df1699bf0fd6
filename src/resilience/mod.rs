//! Resilience Module - Circuit Breakers, Retries, Composition
//! Fault tolerance patterns for calls to unreliable downstream operations

mod backoff;
mod circuit_breaker;
mod observer;
mod protected;
mod retry;

pub use backoff::BackoffPolicy;
pub use circuit_breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, FailureMode, Trigger,
};
pub use observer::{AttemptOutcome, NoopObserver, ResiliencyObserver};
pub use protected::{ProtectedCall, ProtectedCallBuilder, Resilience};
pub use retry::{RetryConfig, RetryExecutor};
