//! # Relay Dispatch
//!
//! Asynchronous message dispatch on top of `relay-queue`.
//!
//! Two queues are owned by a [`QueueManager`]: `messages` for single sends
//! (sequential) and `bulk-messages` for batches (five at a time). Every job
//! consumes the sender's rate limit, then goes out through the
//! [`Transport`]. Failures of either kind are retried at the tail of the
//! queue until the attempt budget runs out.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use relay_dispatch::{
//!     DispatchConfig, MockTransport, OutboundMessage, QueueManager, WindowedRateLimiter,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DispatchConfig::default();
//!     let limiter = WindowedRateLimiter::new(config.rate_limit.clone())?;
//!     let manager = QueueManager::new(
//!         &config,
//!         Arc::new(MockTransport::reliable()),
//!         Arc::new(limiter),
//!     )?;
//!
//!     manager.on_failed(|queue, job, error| {
//!         eprintln!("{queue} job {} failed: {error}", job.id);
//!         Ok(())
//!     });
//!
//!     let id = manager.submit_message("15551234567", "hi", Some("u1"));
//!     let ids = manager.submit_bulk(vec![OutboundMessage::new("15557654321", "hello")]);
//!     assert_eq!(ids.len(), 1);
//!     println!("queued {id}");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod handler;
pub mod manager;
pub mod message;
pub mod mock;
pub mod rate_limit;
pub mod telemetry;
pub mod transport;

pub use config::{ConfigError, DispatchConfig, PacingConfig, QueueConfig};
pub use handler::{DispatchError, DispatchHandler};
pub use manager::{ManagerStatus, QueueKind, QueueManager};
pub use message::OutboundMessage;
pub use mock::MockTransport;
pub use rate_limit::{
    RateLimitConfig, RateLimitExceeded, RateLimitWindow, RateLimiter, WindowedRateLimiter,
};
pub use relay_queue::{Job, JobFailure, JobId, JobStatus, QueueStatus};
pub use transport::{Delivery, Transport, TransportError};
