//! Configuration Module
//! Loads breaker and retry settings from environment variables

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::resilience::{BackoffPolicy, CircuitBreakerConfig, FailureMode, RetryConfig};

#[derive(Debug, Clone, Default)]
pub struct ResiliencyConfig {
    pub breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
}

impl ResiliencyConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::from_lookup(|key| env::var(key).ok())?)
    }

    /// Build from any key lookup; missing keys take their defaults.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let name = lookup("RESILIENCY_BREAKER_NAME").unwrap_or_else(|| "default".to_string());

        let breaker = CircuitBreakerConfig {
            name: name.clone(),
            failure_threshold: parse_or(&lookup, "RESILIENCY_FAILURE_THRESHOLD", 5)?,
            cooldown: Duration::from_millis(parse_or(&lookup, "RESILIENCY_COOLDOWN_MS", 30_000)?),
            failure_mode: match lookup("RESILIENCY_FAILURE_MODE").as_deref() {
                None | Some("propagate") => FailureMode::Propagate,
                Some("fallback") => FailureMode::Fallback,
                Some(other) => {
                    return Err(ConfigError::InvalidEnv {
                        key: "RESILIENCY_FAILURE_MODE",
                        value: other.to_string(),
                    })
                }
            },
        };

        let max_delay_ms: Option<u64> = parse_opt(&lookup, "RESILIENCY_MAX_DELAY_MS")?;
        let backoff = BackoffPolicy {
            initial_delay: Duration::from_millis(parse_or(&lookup, "RESILIENCY_INITIAL_DELAY_MS", 1_000)?),
            multiplier: parse_or(&lookup, "RESILIENCY_BACKOFF_MULTIPLIER", 2.0)?,
            max_delay: max_delay_ms.map(Duration::from_millis),
            jitter: parse_or(&lookup, "RESILIENCY_JITTER", false)?,
        };

        let retry = RetryConfig {
            name,
            max_attempts: parse_or(&lookup, "RESILIENCY_MAX_ATTEMPTS", 3)?,
            backoff,
            recover_non_retryable: parse_or(&lookup, "RESILIENCY_RECOVER_NON_RETRYABLE", false)?,
        };

        let config = Self { breaker, retry };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.breaker.validate()?;
        self.retry.validate()
    }
}

/// Read a single setting from the environment. Missing keys take `default`;
/// unparseable values are rejected like the `RESILIENCY_*` keys.
pub fn env_or<V: FromStr>(key: &'static str, default: V) -> Result<V, ConfigError> {
    parse_or(&|key: &str| env::var(key).ok(), key, default)
}

fn parse_opt<L, V>(lookup: &L, key: &'static str) -> Result<Option<V>, ConfigError>
where
    L: Fn(&str) -> Option<String>,
    V: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key, value: raw }),
    }
}

fn parse_or<L, V>(lookup: &L, key: &'static str, default: V) -> Result<V, ConfigError>
where
    L: Fn(&str) -> Option<String>,
    V: FromStr,
{
    Ok(parse_opt(lookup, key)?.unwrap_or(default))
}
