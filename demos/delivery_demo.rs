//! End-to-end wiring demo: producer → broker → consumer → failure outbox →
//! recovery scheduler.
//!
//! Publishes flagged orders while the downstream is "down", watches them
//! land in the failure outbox, then brings the downstream back and lets the
//! scheduler recover every row.
//!
//! Run with: `cargo run --example delivery_demo`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use delivered_rust::bus::{event_topic, DeliveredEvent, InMemoryBroker};
use delivered_rust::{
    ConsumerPipeline, ConsumerWorkerThread, EventEnvelope, EventProducer, FailedMessageStatus,
    HandlerError, InMemoryNotificationLog, InMemoryOutbox, NotificationLog, RecoveryService,
    RecoverySchedulerThread, RetryPolicy,
};

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("delivered_rust=debug")),
        )
        .init();

    let topic = event_topic("order");
    let broker = InMemoryBroker::new();
    let outbox = InMemoryOutbox::new();
    let notifications = InMemoryNotificationLog::new();

    // The "downstream" a handler would call. Flagged orders fail while it
    // is down.
    let downstream_up = Arc::new(AtomicBool::new(false));

    let handler = {
        let downstream_up = Arc::clone(&downstream_up);
        move |record: &DeliveredEvent| -> Result<(), HandlerError> {
            let envelope: EventEnvelope<serde_json::Value> = record.event.decode()?;
            if envelope.simulate_failure && !downstream_up.load(Ordering::SeqCst) {
                return Err("downstream rejected the order".into());
            }
            Ok(())
        }
    };

    let pipeline = ConsumerPipeline::new(handler, outbox.clone(), notifications.clone())
        .with_retry_policy(RetryPolicy::fixed(3, Duration::from_millis(20)));
    let worker = ConsumerWorkerThread::spawn(
        broker.subscribe("order-consumers", topic.as_str()),
        pipeline,
        Duration::from_millis(20),
    );

    // Publish test traffic that is guaranteed to fail processing.
    let producer = EventProducer::new(broker.clone());
    for n in 1..=3 {
        producer.publish_failing(
            &topic,
            &format!("order-{n}"),
            "OrderPlaced",
            serde_json::json!({ "order_id": format!("order-{n}"), "amount": n * 100 }),
        );
    }

    assert!(wait_until(Duration::from_secs(5), || outbox.len() == 3));
    println!("\n--- downstream down: 3 deliveries recorded for recovery ---");
    let facade = RecoveryService::new(outbox.clone(), broker.clone(), notifications.clone());
    for row in facade.list_failed_messages(None).unwrap() {
        println!(
            "  {} {} retry_count={} error={}",
            row.id, row.status, row.retry_count, row.error_message
        );
    }

    // Operator fixes the downstream; the scheduler does the rest.
    downstream_up.store(true, Ordering::SeqCst);
    let scheduler = RecoverySchedulerThread::spawn(
        RecoveryService::new(outbox.clone(), broker.clone(), notifications.clone()),
        Duration::from_millis(100),
    );

    assert!(wait_until(Duration::from_secs(5), || {
        facade
            .list_failed_messages(Some(FailedMessageStatus::Success))
            .map(|rows| rows.len() == 3)
            .unwrap_or(false)
    }));

    let scheduler_stats = scheduler.stop();
    let worker_stats = worker.stop();

    println!("\n--- downstream back up: every row recovered ---");
    for row in facade.list_failed_messages(None).unwrap() {
        println!(
            "  {} {} retry_count={} resolved_at={:?}",
            row.id, row.status, row.retry_count, row.resolved_at
        );
    }

    println!("\n--- unacknowledged notifications ---");
    for alert in notifications.unacknowledged().unwrap() {
        println!("  [{}] {} ({})", alert.level, alert.message, alert.topic);
    }

    println!(
        "\nworker: acked={} recovered={}  scheduler: ticks={} attempted={}",
        worker_stats.acked, worker_stats.recovered, scheduler_stats.ticks, scheduler_stats.attempted
    );
}
