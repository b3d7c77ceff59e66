//! Configuration for the dispatch queues
//!
//! Defaults match the production setup: one sequential queue for single
//! messages, a five-wide queue for bulk batches, three attempts each.

use relay_queue::{BackoffStrategy, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::rate_limit::RateLimitConfig;

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
    #[error("Invalid rate limit window: {0}")]
    InvalidWindow(String),
}

/// Settings for one queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Jobs processed simultaneously
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl QueueConfig {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            retry: RetryPolicy::default(),
        }
    }
}

/// Random delay before each send, to spread traffic out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacingConfig {
    pub min: Duration,
    pub max: Duration,
}

impl PacingConfig {
    /// 1-3 seconds between single messages
    pub fn single() -> Self {
        Self {
            min: Duration::from_secs(1),
            max: Duration::from_secs(3),
        }
    }

    /// 3-7 seconds between bulk messages
    pub fn bulk() -> Self {
        Self {
            min: Duration::from_secs(3),
            max: Duration::from_secs(7),
        }
    }
}

/// Full dispatch configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub messages: QueueConfig,
    pub bulk: QueueConfig,
    pub rate_limit: RateLimitConfig,
    /// Disabled unless set
    pub message_pacing: Option<PacingConfig>,
    pub bulk_pacing: Option<PacingConfig>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            messages: QueueConfig::new(1),
            bulk: QueueConfig::new(5),
            rate_limit: RateLimitConfig::default(),
            message_pacing: None,
            bulk_pacing: None,
        }
    }
}

impl DispatchConfig {
    /// Load from environment
    ///
    /// Reads:
    /// - RELAY_MESSAGE_CONCURRENCY / RELAY_BULK_CONCURRENCY (default 1 / 5)
    /// - RELAY_MAX_ATTEMPTS / RELAY_BULK_MAX_ATTEMPTS (default 3)
    /// - RELAY_BACKOFF_MS: exponential backoff base; unset or 0 re-queues immediately
    /// - RELAY_PACING: "1"/"true" enables random send delays
    /// - RELAY_RATE_PER_MINUTE / RELAY_RATE_PER_HOUR / RELAY_RATE_PER_DAY
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(n) = parse::<usize>(&lookup, "RELAY_MESSAGE_CONCURRENCY")? {
            config.messages.concurrency = n;
        }
        if let Some(n) = parse::<usize>(&lookup, "RELAY_BULK_CONCURRENCY")? {
            config.bulk.concurrency = n;
        }
        if let Some(n) = parse::<u32>(&lookup, "RELAY_MAX_ATTEMPTS")? {
            config.messages.retry.max_attempts = n;
        }
        if let Some(n) = parse::<u32>(&lookup, "RELAY_BULK_MAX_ATTEMPTS")? {
            config.bulk.retry.max_attempts = n;
        }
        for (key, concurrency) in [
            ("RELAY_MESSAGE_CONCURRENCY", config.messages.concurrency),
            ("RELAY_BULK_CONCURRENCY", config.bulk.concurrency),
        ] {
            if concurrency == 0 {
                return Err(invalid(key, "0"));
            }
        }
        for (key, attempts) in [
            ("RELAY_MAX_ATTEMPTS", config.messages.retry.max_attempts),
            ("RELAY_BULK_MAX_ATTEMPTS", config.bulk.retry.max_attempts),
        ] {
            if attempts == 0 {
                return Err(invalid(key, "0"));
            }
        }

        if let Some(ms) = parse::<u64>(&lookup, "RELAY_BACKOFF_MS")? {
            if ms > 0 {
                let backoff = BackoffStrategy::Exponential {
                    initial: Duration::from_millis(ms),
                    multiplier: 2.0,
                    max: Duration::from_secs(300),
                };
                config.messages.retry.backoff = backoff;
                config.bulk.retry.backoff = backoff;
            }
        }

        if lookup("RELAY_PACING")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
        {
            config.message_pacing = Some(PacingConfig::single());
            config.bulk_pacing = Some(PacingConfig::bulk());
        }

        let rate_keys = [
            "RELAY_RATE_PER_MINUTE",
            "RELAY_RATE_PER_HOUR",
            "RELAY_RATE_PER_DAY",
        ];
        for (window, key) in config.rate_limit.windows.iter_mut().zip(rate_keys) {
            if let Some(n) = parse::<u32>(&lookup, key)? {
                window.max_requests = n;
            }
        }

        Ok(config)
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(key, &raw)),
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    }
}
