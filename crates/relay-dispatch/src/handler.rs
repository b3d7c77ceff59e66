//! Processing function bound to the dispatch queues

use async_trait::async_trait;
use rand::Rng;
use relay_queue::{Job, JobHandler, QueueError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::{ConfigError, PacingConfig};
use crate::manager::QueueKind;
use crate::message::OutboundMessage;
use crate::rate_limit::{RateLimitExceeded, RateLimiter};
use crate::transport::{Delivery, Transport, TransportError};

/// Errors from the dispatch layer
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Queue setup failed: {0}")]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Dispatch handler panicked: {0}")]
    Panicked(String),
}

/// Rate-limits then sends one message per attempt.
///
/// Rate-limit rejections are ordinary failures: they count against the
/// job's attempts like any transport error.
#[derive(Debug)]
pub struct DispatchHandler {
    kind: QueueKind,
    transport: Arc<dyn Transport>,
    limiter: Arc<dyn RateLimiter>,
    pacing: Option<PacingConfig>,
}

impl DispatchHandler {
    pub fn new(
        kind: QueueKind,
        transport: Arc<dyn Transport>,
        limiter: Arc<dyn RateLimiter>,
        pacing: Option<PacingConfig>,
    ) -> Self {
        Self {
            kind,
            transport,
            limiter,
            pacing,
        }
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    fn pacing_delay(&self) -> Option<Duration> {
        let pacing = self.pacing?;
        let min = pacing.min.as_millis() as u64;
        let max = (pacing.max.as_millis() as u64).max(min);
        Some(Duration::from_millis(rand::rng().random_range(min..=max)))
    }
}

#[async_trait]
impl JobHandler for DispatchHandler {
    type Payload = OutboundMessage;
    type Output = Delivery;
    type Error = DispatchError;

    async fn process(&self, job: &Job<OutboundMessage>) -> Result<Delivery, DispatchError> {
        let message = &job.payload;

        if let Some(user_id) = message.user_id.as_deref() {
            self.limiter.consume(user_id).await?;
        }

        if let Some(delay) = self.pacing_delay() {
            debug!(queue = %self.kind, job_id = %job.id, delay_ms = delay.as_millis() as u64, "Pacing send");
            tokio::time::sleep(delay).await;
        }

        let delivery = self
            .transport
            .send_message(&message.destination, &message.body)
            .await?;

        debug!(
            queue = %self.kind,
            job_id = %job.id,
            transport = self.transport.name(),
            message_id = %delivery.message_id,
            "Message handed to transport"
        );
        Ok(delivery)
    }
}
