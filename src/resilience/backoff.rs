//! Exponential backoff policy.

use rand::Rng;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    /// Upper bound for a single delay. `None` leaves the curve uncapped.
    pub max_delay: Option<Duration>,
    /// Spread each delay by up to ±10% to avoid synchronized retries.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: None,
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial_delay: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay,
            multiplier,
            ..Default::default()
        }
    }

    /// Constant delay between attempts.
    pub fn fixed(delay: Duration) -> Self {
        Self::new(delay, 1.0)
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(self.multiplier));
        }
        if let Some(max_delay) = self.max_delay {
            if max_delay < self.initial_delay {
                return Err(ConfigError::MaxDelayBelowInitial {
                    initial_delay: self.initial_delay,
                    max_delay,
                });
            }
        }
        Ok(())
    }

    /// Delay slept after failed attempt `attempt` (1-based):
    /// `initial_delay * multiplier^(attempt - 1)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let mut nanos = (self.initial_delay.as_nanos() as f64 * self.multiplier.powi(exponent)).round();
        if let Some(max_delay) = self.max_delay {
            nanos = nanos.min(max_delay.as_nanos() as f64);
        }

        // Long uncapped curves overflow; saturate before jitter sees the value
        if !nanos.is_finite() || nanos >= u64::MAX as f64 {
            return Duration::MAX;
        }

        if self.jitter && nanos > 0.0 {
            let spread = nanos * 0.1;
            nanos = (nanos + rand::thread_rng().gen_range(-spread..=spread)).round();
        }

        // `as` saturates at u64::MAX when jitter pushes past it
        Duration::from_nanos(nanos as u64)
    }
}
