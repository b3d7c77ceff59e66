//! Queue manager: the submission façade over the two dispatch queues

use relay_queue::{Job, JobFailure, JobId, JobQueue, ListenerError, QueueStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::config::DispatchConfig;
use crate::handler::{DispatchError, DispatchHandler};
use crate::message::OutboundMessage;
use crate::rate_limit::RateLimiter;
use crate::transport::{Delivery, Transport};

/// Which dispatch queue a job belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueKind {
    Messages,
    BulkMessages,
}

impl QueueKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::BulkMessages => "bulk-messages",
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Status of both queues
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerStatus {
    pub messages: QueueStatus,
    pub bulk: QueueStatus,
}

impl ManagerStatus {
    /// No job is waiting, delayed or in flight on either queue
    pub fn is_idle(&self) -> bool {
        [&self.messages, &self.bulk]
            .iter()
            .all(|s| s.pending == 0 && s.processing == 0 && s.delayed == 0)
    }
}

/// Owns the single-message and bulk queues, both bound to the same
/// transport and rate limiter.
///
/// Construct once at startup and share by reference (or clone; clones
/// refer to the same queues).
#[derive(Debug, Clone)]
pub struct QueueManager {
    messages: JobQueue<DispatchHandler>,
    bulk: JobQueue<DispatchHandler>,
}

impl QueueManager {
    /// Build both queues and start their workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: &DispatchConfig,
        transport: Arc<dyn Transport>,
        limiter: Arc<dyn RateLimiter>,
    ) -> Result<Self, DispatchError> {
        let messages = JobQueue::new(QueueKind::Messages.name(), config.messages.retry);
        messages.bind(
            config.messages.concurrency,
            DispatchHandler::new(
                QueueKind::Messages,
                transport.clone(),
                limiter.clone(),
                config.message_pacing,
            ),
        )?;

        let bulk = JobQueue::new(QueueKind::BulkMessages.name(), config.bulk.retry);
        bulk.bind(
            config.bulk.concurrency,
            DispatchHandler::new(
                QueueKind::BulkMessages,
                transport.clone(),
                limiter,
                config.bulk_pacing,
            ),
        )?;

        info!(
            transport = transport.name(),
            message_concurrency = config.messages.concurrency,
            bulk_concurrency = config.bulk.concurrency,
            "Dispatch queues started"
        );
        Ok(Self { messages, bulk })
    }

    /// Queue a single message; returns immediately with its job id.
    pub fn submit_message(
        &self,
        destination: impl Into<String>,
        body: impl Into<String>,
        user_id: Option<&str>,
    ) -> JobId {
        let message = OutboundMessage {
            destination: destination.into(),
            body: body.into(),
            user_id: user_id.map(str::to_string),
            template_id: None,
        };
        self.messages.enqueue(message)
    }

    /// Queue a batch on the bulk queue; ids come back in submission order.
    pub fn submit_bulk<I>(&self, items: I) -> Vec<JobId>
    where
        I: IntoIterator<Item = OutboundMessage>,
    {
        let ids: Vec<JobId> = items
            .into_iter()
            .map(|item| self.bulk.enqueue(item))
            .collect();
        info!(count = ids.len(), "Bulk batch queued");
        ids
    }

    /// Observe successful deliveries on both queues.
    pub fn on_completed<F>(&self, handler: F)
    where
        F: Fn(QueueKind, &Job<OutboundMessage>, &Delivery) -> Result<(), ListenerError>
            + Send
            + Sync
            + 'static,
    {
        let handler = Arc::new(handler);
        let h = handler.clone();
        self.messages
            .on_completed(move |job, delivery| h(QueueKind::Messages, job, delivery));
        self.bulk
            .on_completed(move |job, delivery| handler(QueueKind::BulkMessages, job, delivery));
    }

    /// Observe messages that exhausted their attempts on both queues.
    ///
    /// A panic on the final attempt arrives as [`DispatchError::Panicked`].
    pub fn on_failed<F>(&self, handler: F)
    where
        F: Fn(QueueKind, &Job<OutboundMessage>, &DispatchError) -> Result<(), ListenerError>
            + Send
            + Sync
            + 'static,
    {
        let handler = Arc::new(handler);
        let h = handler.clone();
        self.messages.on_failed(move |job, failure| {
            forward_failure(h.as_ref(), QueueKind::Messages, job, failure)
        });
        self.bulk.on_failed(move |job, failure| {
            forward_failure(handler.as_ref(), QueueKind::BulkMessages, job, failure)
        });
    }

    pub fn messages(&self) -> &JobQueue<DispatchHandler> {
        &self.messages
    }

    pub fn bulk(&self) -> &JobQueue<DispatchHandler> {
        &self.bulk
    }

    pub fn queue(&self, kind: QueueKind) -> &JobQueue<DispatchHandler> {
        match kind {
            QueueKind::Messages => &self.messages,
            QueueKind::BulkMessages => &self.bulk,
        }
    }

    pub fn status(&self) -> ManagerStatus {
        ManagerStatus {
            messages: self.messages.status(),
            bulk: self.bulk.status(),
        }
    }
}

fn forward_failure<F>(
    handler: &F,
    kind: QueueKind,
    job: &Job<OutboundMessage>,
    failure: &JobFailure<DispatchError>,
) -> Result<(), ListenerError>
where
    F: Fn(QueueKind, &Job<OutboundMessage>, &DispatchError) -> Result<(), ListenerError>,
{
    match failure {
        JobFailure::Error(error) => handler(kind, job, error),
        JobFailure::Panicked(message) => {
            handler(kind, job, &DispatchError::Panicked(message.clone()))
        }
    }
}
