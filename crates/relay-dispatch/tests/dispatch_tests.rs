//! End-to-end behaviour of the dispatch queues

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::timeout;

use relay_dispatch::{
    Delivery, DispatchConfig, DispatchError, JobId, MockTransport, OutboundMessage, QueueKind,
    QueueManager, RateLimitExceeded, RateLimiter, Transport, TransportError,
};

const WAIT: Duration = Duration::from_secs(5);

/// Rejects the first `reject_first` calls, then permits everything
#[derive(Debug, Default)]
struct ScriptedLimiter {
    reject_first: u32,
    calls: AtomicU32,
    keys: Mutex<Vec<String>>,
}

impl ScriptedLimiter {
    fn permissive() -> Self {
        Self::default()
    }

    fn rejecting(reject_first: u32) -> Self {
        Self {
            reject_first,
            ..Default::default()
        }
    }
}

#[async_trait]
impl RateLimiter for ScriptedLimiter {
    async fn consume(&self, key: &str) -> Result<(), RateLimitExceeded> {
        self.keys.lock().unwrap().push(key.to_string());
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.reject_first {
            Err(RateLimitExceeded {
                key: key.to_string(),
                retry_after: Duration::from_secs(60),
            })
        } else {
            Ok(())
        }
    }
}

/// Tracks how many sends are in flight at once
#[derive(Debug, Default)]
struct GaugeTransport {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    sent: AtomicU32,
}

#[async_trait]
impl Transport for GaugeTransport {
    fn name(&self) -> &str {
        "gauge"
    }

    async fn send_message(&self, destination: &str, _body: &str) -> Result<Delivery, TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let n = self.sent.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Delivery {
            message_id: format!("gauge-{n}"),
            destination: destination.to_string(),
            sent_at: Utc::now(),
        })
    }
}

/// A transport driver with a bug that panics on every send
#[derive(Debug)]
struct PanickingTransport;

#[async_trait]
impl Transport for PanickingTransport {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn send_message(&self, _destination: &str, _body: &str) -> Result<Delivery, TransportError> {
        panic!("socket state corrupted")
    }
}

type Completed = mpsc::UnboundedReceiver<(QueueKind, JobId, u32, String)>;
type Failed = mpsc::UnboundedReceiver<(QueueKind, JobId, u32, DispatchErrorKind)>;

#[derive(Debug, PartialEq, Eq)]
enum DispatchErrorKind {
    RateLimited,
    Transport,
    Panicked,
    Other,
}

fn observe(manager: &QueueManager) -> (Completed, Failed) {
    let (done_tx, done_rx) = mpsc::unbounded_channel();
    let (fail_tx, fail_rx) = mpsc::unbounded_channel();

    manager.on_completed(move |kind, job, delivery| {
        done_tx.send((kind, job.id, job.attempts, delivery.message_id.clone()))?;
        Ok(())
    });
    manager.on_failed(move |kind, job, error| {
        let error_kind = match error {
            DispatchError::RateLimited(_) => DispatchErrorKind::RateLimited,
            DispatchError::Transport(_) => DispatchErrorKind::Transport,
            DispatchError::Panicked(_) => DispatchErrorKind::Panicked,
            _ => DispatchErrorKind::Other,
        };
        fail_tx.send((kind, job.id, job.attempts, error_kind))?;
        Ok(())
    });

    (done_rx, fail_rx)
}

async fn wait_idle(manager: &QueueManager) {
    timeout(WAIT, async {
        while !manager.status().is_idle() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("queues did not drain");
}

#[tokio::test]
async fn test_transient_transport_failures_then_success() {
    let transport = Arc::new(MockTransport::failing_first(2));
    let limiter = Arc::new(ScriptedLimiter::permissive());
    let manager =
        QueueManager::new(&DispatchConfig::default(), transport.clone(), limiter.clone()).unwrap();
    let (mut done, mut failed) = observe(&manager);

    let id = manager.submit_message("15551234567", "hi", Some("u1"));

    let (kind, job_id, attempts, message_id) = timeout(WAIT, done.recv()).await.unwrap().unwrap();
    assert_eq!(kind, QueueKind::Messages);
    assert_eq!(job_id, id);
    assert_eq!(attempts, 2);
    assert_eq!(message_id, "mock-1");

    wait_idle(&manager).await;
    assert!(done.try_recv().is_err());
    assert!(failed.try_recv().is_err());
    assert_eq!(transport.calls(), 3);
    assert_eq!(limiter.calls.load(Ordering::SeqCst), 3);
    assert_eq!(*limiter.keys.lock().unwrap(), vec!["u1", "u1", "u1"]);
}

#[tokio::test]
async fn test_unreachable_transport_fails_after_three_attempts() {
    let transport = Arc::new(MockTransport::unavailable());
    let manager = QueueManager::new(
        &DispatchConfig::default(),
        transport.clone(),
        Arc::new(ScriptedLimiter::permissive()),
    )
    .unwrap();
    let (mut done, mut failed) = observe(&manager);

    let id = manager.submit_message("15551234567", "hi", None);

    let (kind, job_id, attempts, error) = timeout(WAIT, failed.recv()).await.unwrap().unwrap();
    assert_eq!(kind, QueueKind::Messages);
    assert_eq!(job_id, id);
    assert_eq!(attempts, 3);
    assert_eq!(error, DispatchErrorKind::Transport);

    wait_idle(&manager).await;
    assert_eq!(transport.calls(), 3);
    assert!(done.try_recv().is_err());
    assert_eq!(manager.status().messages.failed, 1);
}

#[tokio::test]
async fn test_rate_limit_rejection_counts_as_attempt() {
    let transport = Arc::new(MockTransport::reliable());
    let limiter = Arc::new(ScriptedLimiter::rejecting(2));
    let manager =
        QueueManager::new(&DispatchConfig::default(), transport.clone(), limiter.clone()).unwrap();
    let (mut done, _failed) = observe(&manager);

    manager.submit_message("15551234567", "hi", Some("u1"));

    let (_, _, attempts, _) = timeout(WAIT, done.recv()).await.unwrap().unwrap();
    assert_eq!(attempts, 2, "two rejections recorded before the permitted attempt");
    assert_eq!(limiter.calls.load(Ordering::SeqCst), 3);
    assert_eq!(transport.calls(), 1, "transport only reached once permitted");
}

#[tokio::test]
async fn test_persistent_rate_limit_exhausts_attempts() {
    let transport = Arc::new(MockTransport::reliable());
    let manager = QueueManager::new(
        &DispatchConfig::default(),
        transport.clone(),
        Arc::new(ScriptedLimiter::rejecting(u32::MAX)),
    )
    .unwrap();
    let (_done, mut failed) = observe(&manager);

    manager.submit_message("15551234567", "hi", Some("u1"));

    let (_, _, attempts, error) = timeout(WAIT, failed.recv()).await.unwrap().unwrap();
    assert_eq!(attempts, 3);
    assert_eq!(error, DispatchErrorKind::RateLimited);
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_anonymous_message_skips_rate_limiter() {
    let limiter = Arc::new(ScriptedLimiter::rejecting(u32::MAX));
    let manager = QueueManager::new(
        &DispatchConfig::default(),
        Arc::new(MockTransport::reliable()),
        limiter.clone(),
    )
    .unwrap();
    let (mut done, _failed) = observe(&manager);

    manager.submit_message("15551234567", "hi", None);

    let (_, _, attempts, _) = timeout(WAIT, done.recv()).await.unwrap().unwrap();
    assert_eq!(attempts, 0);
    assert_eq!(limiter.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_bulk_submission_respects_concurrency() {
    let transport = Arc::new(GaugeTransport::default());
    let manager = QueueManager::new(
        &DispatchConfig::default(),
        transport.clone(),
        Arc::new(ScriptedLimiter::permissive()),
    )
    .unwrap();
    let (mut done, _failed) = observe(&manager);

    let items: Vec<OutboundMessage> = (0..10)
        .map(|i| OutboundMessage::new(format!("1555000{i:04}"), "promo").with_user("u1"))
        .collect();
    let ids = manager.submit_bulk(items);

    assert_eq!(ids.len(), 10);
    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 10);

    let mut completed = Vec::new();
    for _ in 0..10 {
        let (kind, id, _, _) = timeout(WAIT, done.recv()).await.unwrap().unwrap();
        assert_eq!(kind, QueueKind::BulkMessages);
        completed.push(id);
    }
    completed.sort();
    assert_eq!(completed, unique);

    assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 5);
    wait_idle(&manager).await;
    assert_eq!(manager.status().bulk.completed, 10);
    assert_eq!(manager.status().messages.completed, 0);
}

#[tokio::test]
async fn test_single_queue_is_sequential() {
    let transport = Arc::new(GaugeTransport::default());
    let manager = QueueManager::new(
        &DispatchConfig::default(),
        transport.clone(),
        Arc::new(ScriptedLimiter::permissive()),
    )
    .unwrap();

    for i in 0..4 {
        manager.submit_message(format!("1555{i}"), "hi", None);
    }
    wait_idle(&manager).await;

    assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(transport.sent.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_failing_observer_does_not_block_delivery() {
    let manager = QueueManager::new(
        &DispatchConfig::default(),
        Arc::new(MockTransport::reliable()),
        Arc::new(ScriptedLimiter::permissive()),
    )
    .unwrap();
    manager.on_completed(|_, _, _| Err("history write failed".into()));
    let (mut done, _failed) = observe(&manager);

    manager.submit_message("15551234567", "hi", None);
    manager.submit_message("15551234568", "hi", None);

    for _ in 0..2 {
        timeout(WAIT, done.recv()).await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_panicking_transport_reports_failure() {
    let manager = QueueManager::new(
        &DispatchConfig::default(),
        Arc::new(PanickingTransport),
        Arc::new(ScriptedLimiter::permissive()),
    )
    .unwrap();
    let (mut done, mut failed) = observe(&manager);

    let ids = manager.submit_bulk(vec![OutboundMessage::new("15551234567", "hi")]);

    let (kind, id, attempts, error) = timeout(WAIT, failed.recv()).await.unwrap().unwrap();
    assert_eq!(kind, QueueKind::BulkMessages);
    assert_eq!(id, ids[0]);
    assert_eq!(attempts, 3);
    assert_eq!(error, DispatchErrorKind::Panicked);

    wait_idle(&manager).await;
    assert!(done.try_recv().is_err());
    assert_eq!(manager.status().bulk.failed, 1);
}
