//! Notification records for the durable alert trail.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NotificationLevel {
    Info,
    Warn,
    Error,
    Critical,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationLevel::Info => write!(f, "INFO"),
            NotificationLevel::Warn => write!(f, "WARN"),
            NotificationLevel::Error => write!(f, "ERROR"),
            NotificationLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A durable alert about a failed or exhausted delivery.
///
/// Created when a failed message is first recorded and when its retry
/// budget is finally exhausted. `acknowledged` moves `false → true` once
/// and never back.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    /// Topic the failing delivery belonged to
    pub topic: String,
    /// Id of the event whose delivery failed
    pub event_id: String,
    pub level: NotificationLevel,
    pub message: String,
    pub detail: Option<String>,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Create an unacknowledged notification.
    pub fn new(
        topic: impl Into<String>,
        event_id: impl Into<String>,
        level: NotificationLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            event_id: event_id.into(),
            level,
            message: message.into(),
            detail: None,
            acknowledged: false,
            created_at: Utc::now(),
        }
    }

    /// Attach free-form detail (the error text, usually).
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Mark as acknowledged. Idempotent, one-way.
    pub fn acknowledge(&mut self) {
        self.acknowledged = true;
    }
}
