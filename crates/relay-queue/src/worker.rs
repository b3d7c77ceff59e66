//! Worker loop shared by every task of a bound queue

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::JobFailure;
use crate::job::{Job, JobHandler, JobStatus};
use crate::queue::QueueInner;

/// Pull jobs until the runtime shuts down, parking on the queue's
/// `Notify` whenever the pending list is empty.
pub(crate) async fn run<H: JobHandler>(inner: Arc<QueueInner<H>>, handler: Arc<H>, worker: usize) {
    debug!(queue = %inner.name, worker, "Worker started");

    loop {
        // Register interest before checking the list so an enqueue landing
        // between the check and the await is not lost. The registration must
        // not outlive this block: a busy worker holds no waiter.
        let job = {
            let notified = inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match inner.pop() {
                Some(job) => job,
                None => {
                    notified.await;
                    continue;
                }
            }
        };

        process_one(&inner, handler.as_ref(), job, worker).await;
    }
}

async fn process_one<H: JobHandler>(
    inner: &Arc<QueueInner<H>>,
    handler: &H,
    mut job: Job<H::Payload>,
    worker: usize,
) {
    let attempt = job.attempts + 1;
    info!(
        queue = %inner.name,
        job_id = %job.id,
        attempt,
        max_attempts = job.max_attempts,
        worker,
        "Processing job"
    );

    let outcome = AssertUnwindSafe(handler.process(&job)).catch_unwind().await;

    match outcome {
        Ok(Ok(output)) => {
            job.status = JobStatus::Completed;
            inner.completed.fetch_add(1, Ordering::SeqCst);
            inner.processing.fetch_sub(1, Ordering::SeqCst);

            info!(queue = %inner.name, job_id = %job.id, attempt, "Job completed");
            inner.on_completed.emit(&job, &output);
        }
        Ok(Err(e)) => {
            job.attempts += 1;
            job.last_error = Some(e.to_string());

            let permanent = handler.is_permanent(&e);
            if !permanent && job.can_retry() {
                warn!(
                    queue = %inner.name,
                    job_id = %job.id,
                    attempt,
                    error = %e,
                    "Job attempt failed, re-queueing at tail"
                );
                requeue(inner, job);
            } else {
                job.status = JobStatus::Failed;
                inner.failed.fetch_add(1, Ordering::SeqCst);
                inner.processing.fetch_sub(1, Ordering::SeqCst);

                error!(
                    queue = %inner.name,
                    job_id = %job.id,
                    attempts = job.attempts,
                    permanent,
                    error = %e,
                    "Job failed"
                );
                inner.on_failed.emit(&job, &JobFailure::Error(e));
            }
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            job.attempts += 1;
            job.last_error = Some(format!("handler panicked: {message}"));

            if job.can_retry() {
                warn!(
                    queue = %inner.name,
                    job_id = %job.id,
                    attempt,
                    panic = %message,
                    "Job handler panicked, re-queueing at tail"
                );
                requeue(inner, job);
            } else {
                job.status = JobStatus::Failed;
                inner.failed.fetch_add(1, Ordering::SeqCst);
                inner.processing.fetch_sub(1, Ordering::SeqCst);

                error!(
                    queue = %inner.name,
                    job_id = %job.id,
                    attempts = job.attempts,
                    panic = %message,
                    "Job handler panicked on final attempt"
                );
                inner.on_failed.emit(&job, &JobFailure::Panicked(message));
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Return a failed job to the tail, after the configured backoff if any.
fn requeue<H: JobHandler>(inner: &Arc<QueueInner<H>>, mut job: Job<H::Payload>) {
    let delay = inner.retry.backoff.delay(job.attempts);
    job.status = JobStatus::Pending;

    // Push before releasing the counter so status never reads idle in between.
    if delay.is_zero() {
        inner.push(job);
        inner.processing.fetch_sub(1, Ordering::SeqCst);
        return;
    }

    debug!(
        queue = %inner.name,
        job_id = %job.id,
        delay_ms = delay.as_millis() as u64,
        "Delaying re-queue with backoff"
    );
    inner.delayed.fetch_add(1, Ordering::SeqCst);
    inner.processing.fetch_sub(1, Ordering::SeqCst);

    let inner = inner.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        inner.push(job);
        inner.delayed.fetch_sub(1, Ordering::SeqCst);
    });
}
