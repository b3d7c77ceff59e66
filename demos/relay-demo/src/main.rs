//! Relay Demo: single and bulk dispatch against a flaky mock transport
//!
//! 1. Loads `RELAY_*` configuration from the environment
//! 2. Queues one message and a bulk batch of ten
//! 3. Logs completions/failures as they arrive
//! 4. Prints final queue status as JSON
//!
//! Run with: cargo run -p relay-demo

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use relay_dispatch::{
    telemetry, DispatchConfig, MockTransport, OutboundMessage, QueueManager, WindowedRateLimiter,
};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing().context("failed to install tracing subscriber")?;

    let config = DispatchConfig::from_env().context("invalid RELAY_* configuration")?;

    // First two sends drop, exercising the retry path
    let transport = Arc::new(MockTransport::failing_first(2).with_latency(Duration::from_millis(50)));
    let limiter = Arc::new(WindowedRateLimiter::new(config.rate_limit.clone())?);
    let manager = QueueManager::new(&config, transport.clone(), limiter)?;

    manager.on_completed(|queue, job, delivery| {
        tracing::info!(
            %queue,
            job_id = %job.id,
            attempts = job.attempts,
            message_id = %delivery.message_id,
            "Delivered"
        );
        Ok(())
    });
    manager.on_failed(|queue, job, error| {
        tracing::warn!(%queue, job_id = %job.id, %error, "Gave up on message");
        Ok(())
    });

    let id = manager.submit_message("15551234567", "Your code is 4821", Some("demo-user"));
    tracing::info!(job_id = %id, "Queued single message");

    let batch = (0..10).map(|i| {
        OutboundMessage::new(format!("1555000{i:04}"), "Spring sale starts today")
            .with_user("demo-user")
            .with_template("spring-sale")
    });
    let ids = manager.submit_bulk(batch);
    tracing::info!(count = ids.len(), "Queued bulk batch");

    let drained = tokio::time::timeout(Duration::from_secs(120), async {
        while !manager.status().is_idle() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Queues still busy after 120s");
    }

    println!("{}", serde_json::to_string_pretty(&manager.status())?);
    println!("transport calls: {}", transport.calls());
    Ok(())
}
