//! Background recovery scheduler.
//!
//! `RecoverySchedulerThread` spawns a background thread that runs the
//! recovery service's batch pass on a fixed interval.

use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use crate::bus::Publisher;
use crate::notify::NotificationLog;

use super::recovery::RecoveryService;
use super::repository::FailureOutbox;

/// Statistics from the recovery scheduler.
#[derive(Debug, Default, Clone)]
pub struct SchedulerStats {
    /// Number of completed scheduler ticks.
    pub ticks: usize,
    /// Number of rows claimed and attempted across all ticks.
    pub attempted: usize,
}

/// A background thread that periodically redelivers failed messages.
///
/// Follows the same pattern as `ConsumerWorkerThread`: spawn, do work,
/// stop and collect stats. Deploying more than one scheduler instance over
/// the same outbox is safe: the per-row compare-and-set lease makes
/// concurrent ticks skip each other's rows.
///
/// ## Example
///
/// ```ignore
/// use delivered_rust::{RecoveryService, RecoverySchedulerThread};
/// use std::time::Duration;
///
/// let service = RecoveryService::new(outbox, broker, notifications);
/// let scheduler = RecoverySchedulerThread::spawn(service, Duration::from_secs(30));
///
/// // ... rows recover in the background ...
///
/// let stats = scheduler.stop();
/// println!("Attempted {} redeliveries", stats.attempted);
/// ```
pub struct RecoverySchedulerThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<SchedulerStats>>,
}

impl RecoverySchedulerThread {
    /// Default tick interval.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

    /// Spawn a scheduler ticking at the default interval.
    pub fn spawn_default<O, P, N>(service: RecoveryService<O, P, N>) -> Self
    where
        O: FailureOutbox + 'static,
        P: Publisher + 'static,
        N: NotificationLog + 'static,
    {
        Self::spawn(service, Self::DEFAULT_INTERVAL)
    }

    /// Spawn a scheduler running one recovery pass per `interval`.
    pub fn spawn<O, P, N>(service: RecoveryService<O, P, N>, interval: Duration) -> Self
    where
        O: FailureOutbox + 'static,
        P: Publisher + 'static,
        N: NotificationLog + 'static,
    {
        let (stop_tx, stop_rx) = channel();

        let handle = thread::spawn(move || {
            let mut stats = SchedulerStats::default();

            loop {
                let attempted = service.retry_all_pending();
                stats.ticks += 1;
                stats.attempted += attempted;
                if attempted > 0 {
                    debug!(attempted, "recovery tick finished");
                }

                // The interval doubles as the stop-signal wait.
                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }

            stats
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signal the scheduler to stop and wait for it to finish.
    /// Returns the scheduler statistics.
    pub fn stop(mut self) -> SchedulerStats {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap_or_default()
        } else {
            SchedulerStats::default()
        }
    }

    /// Signal the scheduler to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for RecoverySchedulerThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        // Don't join on drop - let the thread finish naturally
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBroker;
    use crate::notify::InMemoryNotificationLog;
    use crate::outbox::{FailedMessage, FailureOutbox, InMemoryOutbox};
    use std::time::Instant;

    #[test]
    fn scheduler_recovers_a_pending_row() {
        let outbox = InMemoryOutbox::new();
        let broker = InMemoryBroker::new();
        let row = FailedMessage::new(
            "event.order",
            Some("order-1".to_string()),
            r#"{"order_id":"order-1"}"#,
            "handler failed",
        );
        let id = row.id;
        outbox.save(row).unwrap();

        let service = RecoveryService::new(
            outbox.clone(),
            broker.clone(),
            InMemoryNotificationLog::new(),
        );
        let scheduler = RecoverySchedulerThread::spawn(service, Duration::from_millis(5));

        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if outbox.get(id).unwrap().map(|r| r.is_resolved()) == Some(true) {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        let stats = scheduler.stop();
        assert!(stats.ticks >= 1);
        assert_eq!(stats.attempted, 1);
        assert!(outbox.get(id).unwrap().unwrap().is_resolved());
        assert_eq!(broker.topic_len("event.order"), 1);
    }

    #[test]
    fn stop_returns_promptly_even_with_a_long_interval() {
        let service = RecoveryService::new(
            InMemoryOutbox::new(),
            InMemoryBroker::new(),
            InMemoryNotificationLog::new(),
        );
        let scheduler = RecoverySchedulerThread::spawn(service, Duration::from_secs(3600));

        let started = Instant::now();
        let stats = scheduler.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(stats.ticks >= 1);
    }
}
