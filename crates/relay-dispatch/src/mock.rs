//! Mock transport for testing

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::transport::{Delivery, Transport, TransportError};

/// A transport that records deliveries instead of sending them.
/// Failures can be scripted to exercise retry paths.
#[derive(Debug)]
pub struct MockTransport {
    pub name: String,
    /// Number of leading calls that fail
    fail_first: u32,
    /// Simulated latency per call
    latency: Duration,
    calls: AtomicU32,
    next_id: AtomicU64,
    deliveries: Mutex<Vec<Delivery>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::reliable()
    }
}

impl MockTransport {
    /// Every call succeeds
    pub fn reliable() -> Self {
        Self::failing_first(0)
    }

    /// The first `n` calls fail with a connection error
    pub fn failing_first(n: u32) -> Self {
        Self {
            name: "mock".to_string(),
            fail_first: n,
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
            next_id: AtomicU64::new(1),
            deliveries: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails
    pub fn unavailable() -> Self {
        Self::failing_first(u32::MAX)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Total send attempts, successful or not
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_message(&self, destination: &str, _body: &str) -> Result<Delivery, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if call < self.fail_first {
            return Err(TransportError::Connection(format!(
                "mock connection dropped on call {}",
                call + 1
            )));
        }

        let delivery = Delivery {
            message_id: format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            destination: destination.to_string(),
            sent_at: Utc::now(),
        };
        self.deliveries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(delivery.clone());
        Ok(delivery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failing_first_then_succeeds() {
        let transport = MockTransport::failing_first(2);

        assert!(transport.send_message("1555", "hi").await.is_err());
        assert!(transport.send_message("1555", "hi").await.is_err());
        let delivery = transport.send_message("1555", "hi").await.unwrap();

        assert_eq!(delivery.destination, "1555");
        assert_eq!(delivery.message_id, "mock-1");
        assert_eq!(transport.calls(), 3);
        assert_eq!(transport.deliveries().len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_never_delivers() {
        let transport = MockTransport::unavailable();
        for _ in 0..5 {
            assert!(matches!(
                transport.send_message("1555", "hi").await,
                Err(TransportError::Connection(_))
            ));
        }
        assert!(transport.deliveries().is_empty());
    }
}
