//! Notification log - append-only alert trail with acknowledge.

use thiserror::Error;
use uuid::Uuid;

use super::notification::Notification;

/// Error type for notification log operations.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification log lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("notification {0} not found")]
    NotFound(Uuid),
}

/// Durable, append-only trail of delivery alerts.
///
/// Notifications are best-effort signaling: a failed insert must never
/// unwind the outbox write that triggered it. Callers log an insert
/// failure and move on; the failed message itself is already durable.
pub trait NotificationLog: Send + Sync {
    /// Append a notification. Returns the stored notification's id.
    fn notify_failure(&self, notification: Notification) -> Result<Uuid, NotifyError>;

    /// Mark a notification as acknowledged.
    ///
    /// Calling this twice is a no-op, not an error.
    fn acknowledge(&self, id: Uuid) -> Result<(), NotifyError>;

    /// All unacknowledged notifications, newest first.
    fn unacknowledged(&self) -> Result<Vec<Notification>, NotifyError>;

    /// All notifications for one topic, newest first.
    fn by_topic(&self, topic: &str) -> Result<Vec<Notification>, NotifyError>;
}

/// In-memory notification log for testing and single-process scenarios.
///
/// Clones share the same storage.
#[derive(Clone, Default)]
pub struct InMemoryNotificationLog {
    entries: std::sync::Arc<std::sync::RwLock<Vec<Notification>>>,
}

impl InMemoryNotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of notifications, acknowledged or not.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotificationLog for InMemoryNotificationLog {
    fn notify_failure(&self, notification: Notification) -> Result<Uuid, NotifyError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| NotifyError::LockPoisoned("insert"))?;
        let id = notification.id;
        entries.push(notification);
        Ok(id)
    }

    fn acknowledge(&self, id: Uuid) -> Result<(), NotifyError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| NotifyError::LockPoisoned("acknowledge"))?;
        match entries.iter_mut().find(|n| n.id == id) {
            Some(notification) => {
                notification.acknowledge();
                Ok(())
            }
            None => Err(NotifyError::NotFound(id)),
        }
    }

    fn unacknowledged(&self) -> Result<Vec<Notification>, NotifyError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| NotifyError::LockPoisoned("read"))?;
        let mut matched: Vec<Notification> = entries
            .iter()
            .filter(|n| !n.acknowledged)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }

    fn by_topic(&self, topic: &str) -> Result<Vec<Notification>, NotifyError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| NotifyError::LockPoisoned("read"))?;
        let mut matched: Vec<Notification> =
            entries.iter().filter(|n| n.topic == topic).cloned().collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationLevel;
    use chrono::Duration;

    fn notification(topic: &str, message: &str) -> Notification {
        Notification::new(topic, "evt-1", NotificationLevel::Error, message)
    }

    #[test]
    fn append_and_read_back() {
        let log = InMemoryNotificationLog::new();
        let id = log.notify_failure(notification("event.order", "failed")).unwrap();

        let unacked = log.unacknowledged().unwrap();
        assert_eq!(unacked.len(), 1);
        assert_eq!(unacked[0].id, id);
    }

    #[test]
    fn acknowledge_twice_is_a_no_op() {
        let log = InMemoryNotificationLog::new();
        let id = log.notify_failure(notification("event.order", "failed")).unwrap();

        log.acknowledge(id).unwrap();
        log.acknowledge(id).unwrap();

        assert!(log.unacknowledged().unwrap().is_empty());
        assert!(log.by_topic("event.order").unwrap()[0].acknowledged);
    }

    #[test]
    fn acknowledge_unknown_id_is_not_found() {
        let log = InMemoryNotificationLog::new();
        assert!(matches!(
            log.acknowledge(Uuid::new_v4()),
            Err(NotifyError::NotFound(_))
        ));
    }

    #[test]
    fn queries_return_newest_first() {
        let log = InMemoryNotificationLog::new();

        let mut older = notification("event.order", "first");
        older.created_at -= Duration::seconds(10);
        log.notify_failure(older).unwrap();
        log.notify_failure(notification("event.order", "second")).unwrap();

        let unacked = log.unacknowledged().unwrap();
        assert_eq!(unacked[0].message, "second");
        assert_eq!(unacked[1].message, "first");

        let by_topic = log.by_topic("event.order").unwrap();
        assert_eq!(by_topic[0].message, "second");
    }

    #[test]
    fn by_topic_filters() {
        let log = InMemoryNotificationLog::new();
        log.notify_failure(notification("event.order", "order failed")).unwrap();
        log.notify_failure(notification("event.payment", "payment failed")).unwrap();

        let orders = log.by_topic("event.order").unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].message, "order failed");
    }
}
