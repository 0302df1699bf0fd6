//! Resiliency Demo - drives two simulated unstable services
//! One is guarded by the circuit breaker, the other by retry with recovery

use rand::Rng;
use resiliency_core::config::env_or;
use resiliency_core::observability::{self, TracingObserver};
use resiliency_core::{CircuitBreaker, ProtectedCall, ResiliencyConfig, RetryExecutor};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
enum ServiceError {
    #[error("Temporary failure")]
    Temporary,
    #[error("Simulated failure")]
    Simulated,
}

/// Fails unless its call counter is a multiple of three.
#[derive(Default)]
struct UnstableCounterService {
    attempts: AtomicU32,
}

impl UnstableCounterService {
    async fn call(&self) -> Result<String, ServiceError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        info!(attempt = attempt, "Counter service called");

        if attempt % 3 != 0 {
            warn!(attempt = attempt, "Simulated failure");
            return Err(ServiceError::Temporary);
        }
        Ok(format!("Success on attempt {}", attempt))
    }
}

/// Fails at random half the time.
async fn unstable_random_service() -> Result<String, ServiceError> {
    if rand::thread_rng().gen_bool(0.5) {
        return Err(ServiceError::Simulated);
    }
    Ok("Success after retry!".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ResiliencyConfig::from_env()?;
    let calls: u32 = env_or("DEMO_CALLS", 10)?;

    observability::init_logging("resiliency-demo")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        failure_threshold = config.breaker.failure_threshold,
        cooldown_ms = config.breaker.cooldown.as_millis() as u64,
        max_attempts = config.retry.max_attempts,
        "Starting resiliency demo..."
    );

    let observer = Arc::new(TracingObserver);

    let breaker = Arc::new(CircuitBreaker::with_observer(config.breaker.clone(), observer.clone())?);
    let counter_service = Arc::new(UnstableCounterService::default());
    let service = counter_service.clone();
    let breaker_call = ProtectedCall::builder(move || {
        let service = service.clone();
        async move { service.call().await }
    })
    .breaker(breaker.clone())
    .fallback(|_trigger| async { Ok("Fallback response after failure".to_string()) })
    .build()?;

    let retry = Arc::new(RetryExecutor::<ServiceError>::new(config.retry.clone())?.with_observer(observer));
    let retry_call = ProtectedCall::builder(unstable_random_service)
        .retry(retry)
        .recover(|_exhausted| async {
            Ok("Definitive failure after multiple attempts. Providing alternative response.".to_string())
        })
        .build()?;

    let demo = async {
        for call in 1..=calls {
            match breaker_call.invoke().await {
                Ok(body) => info!(call = call, body = %body, "circuit-breaker endpoint"),
                Err(e) => warn!(call = call, error = %e, "circuit-breaker endpoint failed"),
            }

            match retry_call.invoke().await {
                Ok(body) => info!(
                    call = call,
                    attempts = retry_call.last_attempts().unwrap_or_default(),
                    body = %body,
                    "retry endpoint"
                ),
                Err(e) => warn!(call = call, error = %e, "retry endpoint failed"),
            }

            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    };

    tokio::select! {
        _ = demo => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    println!("{}", serde_json::to_string_pretty(&breaker.snapshot())?);
    info!("Resiliency demo stopped");
    Ok(())
}
