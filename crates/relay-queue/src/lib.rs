//! # Relay Queue
//!
//! In-memory async job queue for outbound work.
//!
//! Features:
//! - Typed `JobHandler` bound once per queue
//! - FIFO pending list with tail re-queue on failure
//! - Fixed-size worker pool woken on enqueue (no polling)
//! - `completed` / `failed` observers with per-observer error isolation

pub mod error;
pub mod events;
pub mod job;
pub mod queue;
mod worker;

pub use error::{JobFailure, ListenerError, QueueError};
pub use events::Listener;
pub use job::{BackoffStrategy, Job, JobHandler, JobId, JobStatus, RetryPolicy};
pub use queue::{JobQueue, QueueStatus};
