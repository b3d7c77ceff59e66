//! Transport trait and delivery types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the message transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport is not ready")]
    NotReady,
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Message rejected: {0}")]
    Rejected(String),
}

/// Receipt for a message handed to the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub message_id: String,
    pub destination: String,
    pub sent_at: DateTime<Utc>,
}

/// Performs the actual network delivery.
///
/// Called once per processing attempt, so implementations must tolerate
/// being retried for the same message.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Get the transport name
    fn name(&self) -> &str;

    /// Deliver `body` to `destination`
    async fn send_message(&self, destination: &str, body: &str) -> Result<Delivery, TransportError>;
}
