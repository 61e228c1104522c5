//! Threaded consumer worker for background record processing.
//!
//! This module provides a background thread that polls a subscription,
//! runs each record through the consumer pipeline, and commits offsets
//! explicitly.

use std::sync::mpsc::{channel, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, warn};

use crate::bus::Subscriber;
use crate::notify::NotificationLog;
use crate::outbox::FailureOutbox;

use super::pipeline::{ConsumerPipeline, Disposition, EventHandler};

/// Statistics from the consumer worker.
#[derive(Debug, Default, Clone)]
pub struct WorkerStats {
    /// Number of records processed successfully.
    pub acked: usize,
    /// Number of records handed off to the failure outbox.
    pub recovered: usize,
    /// Number of records left with the broker because the handoff failed.
    pub handoff_failures: usize,
    /// Number of poll cycles completed.
    pub polls: usize,
}

/// A background thread that drains a subscription through a pipeline.
///
/// Offsets are committed only after the pipeline returns a disposition:
/// the record succeeded, or its failure is durable in the outbox. When the
/// handoff itself fails the offset is withheld, so the broker redelivers
/// the record to the next worker of the group.
///
/// ## Example
///
/// ```ignore
/// use delivered_rust::{ConsumerPipeline, ConsumerWorkerThread};
/// use std::time::Duration;
///
/// let pipeline = ConsumerPipeline::new(handler, outbox, notifications);
/// let worker = ConsumerWorkerThread::spawn(
///     broker.subscribe("order-consumers", "event.order"),
///     pipeline,
///     Duration::from_millis(50),
/// );
///
/// // ... records flow ...
///
/// let stats = worker.stop();
/// println!("Acked {} records", stats.acked);
/// ```
pub struct ConsumerWorkerThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<WorkerStats>>,
}

impl ConsumerWorkerThread {
    /// Spawn a worker polling `subscription` with the given timeout per
    /// poll.
    pub fn spawn<S, H, O, N>(
        subscription: S,
        pipeline: ConsumerPipeline<H, O, N>,
        poll_timeout: Duration,
    ) -> Self
    where
        S: Subscriber + 'static,
        H: EventHandler + 'static,
        O: FailureOutbox + 'static,
        N: NotificationLog + 'static,
    {
        let (stop_tx, stop_rx) = channel();

        let handle = thread::spawn(move || {
            let mut stats = WorkerStats::default();
            let poll_ms = poll_timeout.as_millis() as u64;

            loop {
                // Check for stop signal
                match stop_rx.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => break,
                    Err(TryRecvError::Empty) => {}
                }

                stats.polls += 1;

                match subscription.poll(poll_ms) {
                    Ok(Some(record)) => match pipeline.process(&record) {
                        Ok(disposition) => {
                            match disposition {
                                Disposition::Acked => stats.acked += 1,
                                Disposition::Recovering => stats.recovered += 1,
                            }
                            if let Err(err) = subscription.commit(record.partition, record.offset)
                            {
                                error!(
                                    topic = %record.topic,
                                    partition = record.partition,
                                    offset = record.offset,
                                    %err,
                                    "offset commit failed"
                                );
                            }
                        }
                        Err(err) => {
                            // Withhold the offset; the broker redelivers.
                            stats.handoff_failures += 1;
                            error!(
                                topic = %record.topic,
                                partition = record.partition,
                                offset = record.offset,
                                %err,
                                "record not handed off; leaving it with the broker"
                            );
                        }
                    },
                    Ok(None) => {}
                    Err(err) => {
                        warn!(%err, "poll failed");
                        thread::sleep(poll_timeout);
                    }
                }
            }

            stats
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signal the worker to stop and wait for it to finish.
    /// Returns the worker statistics.
    pub fn stop(mut self) -> WorkerStats {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap_or_default()
        } else {
            WorkerStats::default()
        }
    }

    /// Signal the worker to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for ConsumerWorkerThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        // Don't join on drop - let the thread finish naturally
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{DeliveredEvent, InMemoryBroker, Subscribable, Subscriber};
    use super::super::pipeline::HandlerError;
    use super::super::retry::RetryPolicy;
    use crate::envelope::EventEnvelope;
    use crate::notify::InMemoryNotificationLog;
    use crate::outbox::InMemoryOutbox;
    use crate::producer::EventProducer;
    use std::time::Instant;

    fn envelope_handler(record: &DeliveredEvent) -> Result<(), HandlerError> {
        let envelope: EventEnvelope<serde_json::Value> =
            record.event.decode().map_err(|e| Box::new(e) as HandlerError)?;
        if envelope.simulate_failure {
            return Err("simulated processing failure".into());
        }
        Ok(())
    }

    fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let end = Instant::now() + deadline;
        while Instant::now() < end {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    #[test]
    fn worker_acks_healthy_records() {
        let broker = InMemoryBroker::new();
        let outbox = InMemoryOutbox::new();
        let producer = EventProducer::new(broker.clone());

        producer
            .publish("event.order", "order-1", "OrderPlaced", serde_json::json!({"n": 1}))
            .unwrap();

        let pipeline = ConsumerPipeline::new(
            envelope_handler as fn(&DeliveredEvent) -> Result<(), HandlerError>,
            outbox.clone(),
            InMemoryNotificationLog::new(),
        )
        .with_retry_policy(RetryPolicy::fixed(3, Duration::ZERO));

        let subscription = broker.subscribe("order-consumers", "event.order");
        let worker =
            ConsumerWorkerThread::spawn(subscription.clone(), pipeline, Duration::from_millis(5));

        assert!(wait_until(Duration::from_secs(2), || {
            subscription.new_subscriber().poll(1).ok().flatten().is_none()
        }));
        let stats = worker.stop();

        assert_eq!(stats.acked, 1);
        assert_eq!(stats.recovered, 0);
        assert!(outbox.is_empty());
    }

    #[test]
    fn worker_commits_after_handoff_so_the_record_is_not_redelivered() {
        let broker = InMemoryBroker::new();
        let outbox = InMemoryOutbox::new();
        let notifications = InMemoryNotificationLog::new();
        let producer = EventProducer::new(broker.clone());

        producer
            .publish_failing("event.order", "order-1", "OrderPlaced", serde_json::json!({"n": 1}))
            .unwrap();

        let pipeline = ConsumerPipeline::new(
            envelope_handler as fn(&DeliveredEvent) -> Result<(), HandlerError>,
            outbox.clone(),
            notifications.clone(),
        )
        .with_retry_policy(RetryPolicy::fixed(3, Duration::ZERO));

        let subscription = broker.subscribe("order-consumers", "event.order");
        let worker =
            ConsumerWorkerThread::spawn(subscription.clone(), pipeline, Duration::from_millis(5));

        assert!(wait_until(Duration::from_secs(2), || outbox.len() == 1));
        let stats = worker.stop();

        assert_eq!(stats.recovered, 1);
        assert_eq!(notifications.len(), 1);
        // The offset was committed: a restarted group member sees nothing.
        let restarted = subscription.new_subscriber();
        assert!(restarted.poll(10).unwrap().is_none());
    }

    #[test]
    fn failed_handoff_withholds_the_offset_until_a_restart_succeeds() {
        use crate::outbox::{FailedMessage, FailedMessageStatus, OutboxError};
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use uuid::Uuid;

        /// Outbox whose first `refusals` saves fail, modeling a store
        /// outage during handoff.
        #[derive(Clone)]
        struct FlakyOutbox {
            inner: InMemoryOutbox,
            refusals: Arc<AtomicUsize>,
        }

        impl FailureOutbox for FlakyOutbox {
            fn save(&self, message: FailedMessage) -> Result<(), OutboxError> {
                let remaining = self.refusals.load(Ordering::SeqCst);
                if remaining > 0 {
                    self.refusals.store(remaining - 1, Ordering::SeqCst);
                    return Err(OutboxError::LockPoisoned("save"));
                }
                self.inner.save(message)
            }
            fn get(&self, id: Uuid) -> Result<Option<FailedMessage>, OutboxError> {
                self.inner.get(id)
            }
            fn update(&self, message: &FailedMessage) -> Result<(), OutboxError> {
                self.inner.update(message)
            }
            fn list_by_status(
                &self,
                status: Option<FailedMessageStatus>,
            ) -> Result<Vec<FailedMessage>, OutboxError> {
                self.inner.list_by_status(status)
            }
            fn find_pending(&self) -> Result<Vec<FailedMessage>, OutboxError> {
                self.inner.find_pending()
            }
            fn cas_status(
                &self,
                id: Uuid,
                from: FailedMessageStatus,
                to: FailedMessageStatus,
            ) -> Result<bool, OutboxError> {
                self.inner.cas_status(id, from, to)
            }
        }

        let broker = InMemoryBroker::new();
        let inner = InMemoryOutbox::new();
        let outbox = FlakyOutbox {
            inner: inner.clone(),
            refusals: Arc::new(AtomicUsize::new(1)),
        };
        let producer = EventProducer::new(broker.clone());
        producer
            .publish_failing("event.order", "order-1", "OrderPlaced", serde_json::json!({}))
            .unwrap();

        let make_pipeline = |outbox: FlakyOutbox| {
            ConsumerPipeline::new(
                envelope_handler as fn(&DeliveredEvent) -> Result<(), HandlerError>,
                outbox,
                InMemoryNotificationLog::new(),
            )
            .with_retry_policy(RetryPolicy::fixed(1, Duration::ZERO))
        };

        // First consumer run: the handoff fails, so the offset stays
        // uncommitted and no row exists.
        let subscription = broker.subscribe("order-consumers", "event.order");
        let worker = ConsumerWorkerThread::spawn(
            subscription.clone(),
            make_pipeline(outbox.clone()),
            Duration::from_millis(5),
        );
        assert!(wait_until(Duration::from_secs(2), || {
            outbox.refusals.load(Ordering::SeqCst) == 0
        }));
        let stats = worker.stop();
        assert!(stats.handoff_failures >= 1);
        assert!(inner.is_empty());

        // Restarted consumer: the broker redelivers, the store is back,
        // the failure becomes durable.
        let restarted = subscription.new_subscriber();
        let worker =
            ConsumerWorkerThread::spawn(restarted, make_pipeline(outbox), Duration::from_millis(5));
        assert!(wait_until(Duration::from_secs(2), || inner.len() == 1));
        let stats = worker.stop();
        assert_eq!(stats.recovered, 1);
    }
}
