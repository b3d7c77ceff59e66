//! Per-user send rate limiting
//!
//! Each key gets its own set of GCRA limiters (via governor), one per
//! configured window. A send must pass every window; overrunning any of
//! them blocks the key for that window's block duration.

use async_trait::async_trait;
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as Governor,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::ConfigError;

/// Rejection from a rate limiter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Rate limit exceeded for '{key}', retry in {}s", .retry_after.as_secs())]
pub struct RateLimitExceeded {
    pub key: String,
    pub retry_after: Duration,
}

/// Gates send frequency per user
#[async_trait]
pub trait RateLimiter: Send + Sync + std::fmt::Debug {
    /// Consume one send for `key`, or reject it
    async fn consume(&self, key: &str) -> Result<(), RateLimitExceeded>;
}

/// One quota window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitWindow {
    pub max_requests: u32,
    pub window: Duration,
    /// How long a key stays blocked after overrunning this window
    pub block: Duration,
}

impl RateLimitWindow {
    pub fn new(max_requests: u32, window: Duration, block: Duration) -> Self {
        Self {
            max_requests,
            window,
            block,
        }
    }

    /// `max_requests` burst, replenished evenly over `window`
    fn quota(&self) -> Option<Quota> {
        let burst = NonZeroU32::new(self.max_requests)?;
        Quota::with_period(self.window / self.max_requests).map(|q| q.allow_burst(burst))
    }
}

/// Rate limiter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub windows: Vec<RateLimitWindow>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            windows: vec![
                // 30 per minute, blocked 2 minutes
                RateLimitWindow::new(30, Duration::from_secs(60), Duration::from_secs(120)),
                // 200 per hour, blocked 1 hour
                RateLimitWindow::new(200, Duration::from_secs(3600), Duration::from_secs(3600)),
                // 1000 per day, blocked 1 day
                RateLimitWindow::new(1000, Duration::from_secs(86_400), Duration::from_secs(86_400)),
            ],
        }
    }
}

type WindowLimiter = Governor<NotKeyed, InMemoryState, DefaultClock>;

/// Limiter state for a single key
#[derive(Debug)]
struct KeyState {
    limiters: Vec<WindowLimiter>,
    blocked_until: Mutex<Option<Instant>>,
    last_seen: Mutex<Instant>,
}

/// In-memory multi-window limiter keyed by user id
///
/// Each `consume` charges every window, including after one has rejected.
#[derive(Debug)]
pub struct WindowedRateLimiter {
    windows: Vec<(RateLimitWindow, Quota)>,
    keys: RwLock<HashMap<String, Arc<KeyState>>>,
}

impl WindowedRateLimiter {
    pub fn new(config: RateLimitConfig) -> Result<Self, ConfigError> {
        let windows = config
            .windows
            .into_iter()
            .map(|w| match w.quota() {
                Some(quota) => Ok((w, quota)),
                None => Err(ConfigError::InvalidWindow(format!(
                    "{} requests per {:?}",
                    w.max_requests, w.window
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            windows,
            keys: RwLock::new(HashMap::new()),
        })
    }

    /// Forget all state for a key, lifting any block
    pub async fn reset(&self, key: &str) {
        self.keys.write().await.remove(key);
    }

    /// Number of keys currently tracked
    pub async fn tracked_keys(&self) -> usize {
        self.keys.read().await.len()
    }

    /// Drop keys that are not blocked and were idle for the longest window
    pub async fn cleanup(&self) {
        let idle = self
            .windows
            .iter()
            .map(|(w, _)| w.window)
            .max()
            .unwrap_or_default();
        let now = Instant::now();

        let mut keys = self.keys.write().await;
        let before = keys.len();
        keys.retain(|_, state| {
            let blocked = lock(&state.blocked_until).is_some_and(|until| until > now);
            let last_seen = *lock(&state.last_seen);
            blocked || now.duration_since(last_seen) < idle
        });
        tracing::debug!(
            removed = before - keys.len(),
            remaining = keys.len(),
            "Rate limiter cleanup"
        );
    }

    /// Get or create the limiters for a key
    async fn state_for(&self, key: &str) -> Arc<KeyState> {
        // Fast path: check if exists
        {
            let keys = self.keys.read().await;
            if let Some(state) = keys.get(key) {
                return state.clone();
            }
        }

        let mut keys = self.keys.write().await;
        keys.entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(KeyState {
                    limiters: self
                        .windows
                        .iter()
                        .map(|(_, quota)| Governor::direct(*quota))
                        .collect(),
                    blocked_until: Mutex::new(None),
                    last_seen: Mutex::new(Instant::now()),
                })
            })
            .clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl RateLimiter for WindowedRateLimiter {
    async fn consume(&self, key: &str) -> Result<(), RateLimitExceeded> {
        let state = self.state_for(key).await;
        let now = Instant::now();
        *lock(&state.last_seen) = now;

        {
            let mut blocked = lock(&state.blocked_until);
            match *blocked {
                Some(until) if until > now => {
                    return Err(RateLimitExceeded {
                        key: key.to_string(),
                        retry_after: until - now,
                    });
                }
                Some(_) => *blocked = None,
                None => {}
            }
        }

        let clock = DefaultClock::default();
        let mut block_for: Option<Duration> = None;
        for ((window, _), limiter) in self.windows.iter().zip(&state.limiters) {
            if let Err(not_until) = limiter.check() {
                let wait = not_until.wait_time_from(clock.now());
                let penalty = window.block.max(wait);
                block_for = Some(block_for.map_or(penalty, |b| b.max(penalty)));
            }
        }

        match block_for {
            None => Ok(()),
            Some(retry_after) => {
                *lock(&state.blocked_until) = Some(now + retry_after);
                tracing::warn!(
                    key = %key,
                    retry_after_secs = retry_after.as_secs(),
                    "Rate limit exceeded, key blocked"
                );
                Err(RateLimitExceeded {
                    key: key.to_string(),
                    retry_after,
                })
            }
        }
    }
}
