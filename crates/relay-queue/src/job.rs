//! Job definitions

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::time::Duration;

/// Job Identifier
///
/// Issued from a per-queue counter, so ids are unique and increasing
/// within one queue instance only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job Status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in queue (or waiting out a retry delay)
    Pending,
    /// Currently being processed
    Processing,
    /// Successfully completed
    Completed,
    /// Permanently failed after max attempts
    Failed,
}

/// A unit of queued work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job<P> {
    pub id: JobId,
    /// Name of the owning queue
    pub queue: String,
    pub payload: P,
    /// Failed processing attempts so far
    pub attempts: u32,
    pub max_attempts: u32,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl<P> Job<P> {
    pub(crate) fn new(id: JobId, queue: &str, payload: P, max_attempts: u32) -> Self {
        Self {
            id,
            queue: queue.to_string(),
            payload,
            attempts: 0,
            max_attempts,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            last_error: None,
        }
    }

    /// Whether another attempt is allowed after the failures recorded so far.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Typed processing function bound to a queue.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    type Payload: Clone + Debug + Send + Sync + 'static;
    type Output: Debug + Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Execute one attempt of the job
    async fn process(&self, job: &Job<Self::Payload>) -> Result<Self::Output, Self::Error>;

    /// Errors classified as permanent skip the remaining attempts.
    fn is_permanent(&self, _error: &Self::Error) -> bool {
        false
    }
}

/// Retry backoff strategy
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Re-insert at the tail right away
    #[default]
    Immediate,
    Constant {
        delay: Duration,
    },
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
}

impl BackoffStrategy {
    /// Delay before re-queueing after `attempt` failures (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Immediate => Duration::ZERO,
            Self::Constant { delay } => *delay,
            Self::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let exp = attempt.saturating_sub(1).min(30) as i32;
                let secs = initial.as_secs_f64() * multiplier.powi(exp);
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    *max
                } else {
                    Duration::from_secs_f64(secs.max(0.0))
                }
            }
        }
    }
}

/// Retry settings fixed onto each job at enqueue time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Immediate,
        }
    }
}
