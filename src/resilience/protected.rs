//! Resilient call composition
//! Retry is the inner layer, the circuit breaker the outer one: the breaker
//! records one outcome per retried unit of work, and an open circuit never
//! enters the retry loop.

use futures::future::{BoxFuture, FutureExt};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerState, Trigger};
use super::retry::RetryExecutor;
use crate::error::{ConfigError, RetriesExhausted};

/// Breaker around retry for ad-hoc calls.
pub struct Resilience<E> {
    breaker: Arc<CircuitBreaker>,
    retry: Arc<RetryExecutor<E>>,
}

impl<E> Clone for Resilience<E> {
    fn clone(&self) -> Self {
        Self {
            breaker: self.breaker.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl<E: Display> Resilience<E> {
    pub fn new(breaker: Arc<CircuitBreaker>, retry: Arc<RetryExecutor<E>>) -> Self {
        Self { breaker, retry }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn retry(&self) -> &RetryExecutor<E> {
        &self.retry
    }

    /// `recover` answers once retries are spent; the breaker still records that
    /// unit as a failure. `fallback` answers when the circuit is open.
    pub async fn execute<T, F, Fut, R, RFut, FB, FBFut>(
        &self,
        operation: F,
        recover: R,
        fallback: FB,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnOnce(RetriesExhausted<E>) -> RFut,
        RFut: Future<Output = Result<T, E>>,
        FB: FnOnce(Trigger<E>) -> FBFut,
        FBFut: Future<Output = Result<T, E>>,
    {
        guarded(&self.breaker, &self.retry, operation, Some(recover), fallback).await
    }
}

/// Retried unit of work under a breaker permit. Ending the retry loop without
/// a value is one breaker failure, settled before `recover` runs.
async fn guarded<T, E, F, Fut, R, RFut, FB, FBFut>(
    breaker: &CircuitBreaker,
    retry: &RetryExecutor<E>,
    operation: F,
    recover: Option<R>,
    fallback: FB,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnOnce(RetriesExhausted<E>) -> RFut,
    RFut: Future<Output = Result<T, E>>,
    FB: FnOnce(Trigger<E>) -> FBFut,
    FBFut: Future<Output = Result<T, E>>,
{
    let permit = match breaker.acquire() {
        Ok(permit) => permit,
        Err(open) => return breaker.reject(open, fallback).await,
    };

    let stop = match retry.run(operation).await {
        Ok(value) => {
            permit.succeed();
            return Ok(value);
        }
        Err(stop) => stop,
    };
    permit.fail(stop.error());

    let result = match recover {
        Some(recover) => retry.resolve(stop, recover).await,
        None => Err(stop.into_error()),
    };
    match result {
        Ok(value) => Ok(value),
        Err(e) => breaker.surface(e, fallback).await,
    }
}

type Operation<T, E> = Box<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>;
type Recover<T, E> = Box<dyn Fn(RetriesExhausted<E>) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;
type Fallback<T, E> = Box<dyn Fn(Trigger<E>) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

/// Answers a retry-only call once the budget is spent.
enum Exhausted<T, E> {
    Recover(Recover<T, E>),
    // Stands in for recover, handed `Trigger::Failed(last_error)`
    Fallback(Fallback<T, E>),
}

enum Layers<T, E> {
    Breaker {
        breaker: Arc<CircuitBreaker>,
        fallback: Fallback<T, E>,
    },
    Retry {
        retry: Arc<RetryExecutor<E>>,
        exhausted: Exhausted<T, E>,
    },
    Both {
        breaker: Arc<CircuitBreaker>,
        retry: Arc<RetryExecutor<E>>,
        recover: Option<Recover<T, E>>,
        fallback: Fallback<T, E>,
    },
}

/// A protected operation bundled with its layers and handlers, invoked with
/// no arguments.
pub struct ProtectedCall<T, E> {
    operation: Operation<T, E>,
    layers: Layers<T, E>,
}

pub struct ProtectedCallBuilder<T, E> {
    operation: Operation<T, E>,
    breaker: Option<Arc<CircuitBreaker>>,
    retry: Option<Arc<RetryExecutor<E>>>,
    recover: Option<Recover<T, E>>,
    fallback: Option<Fallback<T, E>>,
}

impl<T, E> ProtectedCall<T, E>
where
    T: Send + 'static,
    E: Display + Send + 'static,
{
    pub fn builder<F, Fut>(operation: F) -> ProtectedCallBuilder<T, E>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        ProtectedCallBuilder {
            operation: Box::new(move || operation().boxed()),
            breaker: None,
            retry: None,
            recover: None,
            fallback: None,
        }
    }

    pub async fn invoke(&self) -> Result<T, E> {
        let operation = || (self.operation)();

        match &self.layers {
            Layers::Breaker { breaker, fallback } => {
                breaker.execute(operation, |trigger| fallback(trigger)).await
            }
            Layers::Retry {
                retry,
                exhausted: Exhausted::Recover(recover),
            } => retry.execute(operation, |exhausted| recover(exhausted)).await,
            Layers::Retry {
                retry,
                exhausted: Exhausted::Fallback(fallback),
            } => {
                retry
                    .execute(operation, |exhausted| {
                        fallback(Trigger::Failed(exhausted.into_last_error()))
                    })
                    .await
            }
            Layers::Both {
                breaker,
                retry,
                recover,
                fallback,
            } => {
                guarded(breaker, retry, operation, recover.as_ref(), |trigger| fallback(trigger)).await
            }
        }
    }

    fn breaker(&self) -> Option<&CircuitBreaker> {
        match &self.layers {
            Layers::Breaker { breaker, .. } | Layers::Both { breaker, .. } => Some(breaker.as_ref()),
            Layers::Retry { .. } => None,
        }
    }

    pub fn breaker_state(&self) -> Option<CircuitBreakerState> {
        self.breaker().map(|breaker| breaker.state())
    }

    pub fn failure_count(&self) -> Option<u32> {
        self.breaker().map(|breaker| breaker.failure_count())
    }

    /// Attempts the retry layer made on the most recent call.
    pub fn last_attempts(&self) -> Option<u32> {
        match &self.layers {
            Layers::Retry { retry, .. } | Layers::Both { retry, .. } => Some(retry.last_attempts()),
            Layers::Breaker { .. } => None,
        }
    }
}

impl<T, E> ProtectedCallBuilder<T, E>
where
    T: Send + 'static,
    E: Display + Send + 'static,
{
    pub fn breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn retry(mut self, retry: Arc<RetryExecutor<E>>) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn recover<R, RFut>(mut self, recover: R) -> Self
    where
        R: Fn(RetriesExhausted<E>) -> RFut + Send + Sync + 'static,
        RFut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.recover = Some(Box::new(move |exhausted| recover(exhausted).boxed()));
        self
    }

    pub fn fallback<FB, FBFut>(mut self, fallback: FB) -> Self
    where
        FB: Fn(Trigger<E>) -> FBFut + Send + Sync + 'static,
        FBFut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.fallback = Some(Box::new(move |trigger| fallback(trigger).boxed()));
        self
    }

    pub fn build(self) -> Result<ProtectedCall<T, E>, ConfigError> {
        let Self {
            operation,
            breaker,
            retry,
            recover,
            fallback,
        } = self;

        if recover.is_none() && fallback.is_none() {
            return Err(if breaker.is_none() && retry.is_none() {
                ConfigError::NoLayers
            } else {
                ConfigError::MissingHandler
            });
        }

        let layers = match (breaker, retry) {
            (None, None) => return Err(ConfigError::NoLayers),
            (Some(breaker), retry) => {
                let fallback = fallback.ok_or(ConfigError::MissingFallback)?;
                match retry {
                    Some(retry) => Layers::Both {
                        breaker,
                        retry,
                        recover,
                        fallback,
                    },
                    None => Layers::Breaker { breaker, fallback },
                }
            }
            (None, Some(retry)) => {
                let exhausted = match (recover, fallback) {
                    (Some(recover), _) => Exhausted::Recover(recover),
                    (None, Some(fallback)) => Exhausted::Fallback(fallback),
                    (None, None) => return Err(ConfigError::MissingHandler),
                };
                Layers::Retry { retry, exhausted }
            }
        };

        Ok(ProtectedCall { operation, layers })
    }
}
