//! In-memory FIFO job queue

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::error::{JobFailure, ListenerError, QueueError};
use crate::events::Listeners;
use crate::job::{Job, JobHandler, JobId, JobStatus, RetryPolicy};
use crate::worker;

/// Point-in-time view of a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub name: String,
    /// Jobs waiting in the pending list
    pub pending: usize,
    /// Jobs currently inside the handler
    pub processing: usize,
    /// Failed jobs waiting out a backoff delay before re-queueing
    pub delayed: usize,
    pub bound: bool,
    pub concurrency: usize,
    pub completed: u64,
    pub failed: u64,
}

struct Binding<H> {
    handler: Arc<H>,
    concurrency: usize,
}

pub(crate) struct QueueInner<H: JobHandler> {
    pub(crate) name: String,
    pub(crate) retry: RetryPolicy,
    next_id: AtomicU64,
    pending: Mutex<VecDeque<Job<H::Payload>>>,
    pub(crate) notify: Notify,
    binding: OnceLock<Binding<H>>,
    pub(crate) processing: AtomicUsize,
    pub(crate) delayed: AtomicUsize,
    pub(crate) completed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) on_completed: Listeners<H::Payload, H::Output>,
    pub(crate) on_failed: Listeners<H::Payload, JobFailure<H::Error>>,
}

impl<H: JobHandler> QueueInner<H> {
    fn pending(&self) -> MutexGuard<'_, VecDeque<Job<H::Payload>>> {
        // Critical sections never panic, but stay usable if one ever does.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take the head of the pending list, marking it as processing.
    pub(crate) fn pop(&self) -> Option<Job<H::Payload>> {
        let mut pending = self.pending();
        let mut job = pending.pop_front()?;
        job.status = JobStatus::Processing;
        self.processing.fetch_add(1, Ordering::SeqCst);
        Some(job)
    }

    /// Append to the tail and wake one idle worker.
    pub(crate) fn push(&self, mut job: Job<H::Payload>) {
        job.status = JobStatus::Pending;
        self.pending().push_back(job);
        self.notify.notify_one();
    }
}

/// A named queue bound to a single [`JobHandler`].
///
/// Enqueue never blocks and never fails; the pending list is unbounded.
/// Jobs enqueued before [`JobQueue::bind`] wait until workers exist.
pub struct JobQueue<H: JobHandler> {
    inner: Arc<QueueInner<H>>,
}

impl<H: JobHandler> Clone for JobQueue<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<H: JobHandler> std::fmt::Debug for JobQueue<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("name", &self.inner.name)
            .field("retry", &self.inner.retry)
            .finish_non_exhaustive()
    }
}

impl<H: JobHandler> JobQueue<H> {
    pub fn new(name: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                retry,
                next_id: AtomicU64::new(1),
                pending: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                binding: OnceLock::new(),
                processing: AtomicUsize::new(0),
                delayed: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                on_completed: Listeners::new("completed"),
                on_failed: Listeners::new("failed"),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.retry
    }

    /// Append a job to the tail of the queue and return its id.
    pub fn enqueue(&self, payload: H::Payload) -> JobId {
        let id = JobId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let job = Job::new(id, &self.inner.name, payload, self.inner.retry.max_attempts);
        self.inner.push(job);

        debug!(queue = %self.inner.name, job_id = %id, "Job enqueued");
        id
    }

    /// Bind the processing function and spawn `concurrency` workers.
    ///
    /// Must run inside a tokio runtime and may only succeed once per queue.
    pub fn bind(&self, concurrency: usize, handler: H) -> Result<(), QueueError> {
        if concurrency == 0 {
            return Err(QueueError::InvalidConcurrency);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| QueueError::NoRuntime)?;

        let handler = Arc::new(handler);
        self.inner
            .binding
            .set(Binding {
                handler: handler.clone(),
                concurrency,
            })
            .map_err(|_| QueueError::AlreadyBound(self.inner.name.clone()))?;

        for worker_id in 0..concurrency {
            runtime.spawn(worker::run(self.inner.clone(), handler.clone(), worker_id));
        }

        info!(
            queue = %self.inner.name,
            concurrency,
            pending = self.len(),
            "Queue processor bound"
        );
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.inner.binding.get().is_some()
    }

    /// The bound handler, if any.
    pub fn handler(&self) -> Option<Arc<H>> {
        self.inner.binding.get().map(|b| b.handler.clone())
    }

    /// Observe successful completions.
    pub fn on_completed<F>(&self, listener: F)
    where
        F: Fn(&Job<H::Payload>, &H::Output) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.inner.on_completed.add(listener);
    }

    /// Observe jobs that exhausted their attempts, whether the last attempt
    /// returned an error or panicked.
    pub fn on_failed<F>(&self, listener: F)
    where
        F: Fn(&Job<H::Payload>, &JobFailure<H::Error>) -> Result<(), ListenerError>
            + Send
            + Sync
            + 'static,
    {
        self.inner.on_failed.add(listener);
    }

    /// Number of jobs in the pending list.
    pub fn len(&self) -> usize {
        self.inner.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the pending list in processing order.
    pub fn pending_jobs(&self) -> Vec<Job<H::Payload>> {
        self.inner.pending().iter().cloned().collect()
    }

    pub fn status(&self) -> QueueStatus {
        let pending = self.len();
        let binding = self.inner.binding.get();
        QueueStatus {
            name: self.inner.name.clone(),
            pending,
            processing: self.inner.processing.load(Ordering::SeqCst),
            delayed: self.inner.delayed.load(Ordering::SeqCst),
            bound: binding.is_some(),
            concurrency: binding.map(|b| b.concurrency).unwrap_or(0),
            completed: self.inner.completed.load(Ordering::SeqCst),
            failed: self.inner.failed.load(Ordering::SeqCst),
        }
    }
}
