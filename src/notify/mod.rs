//! Notification log - durable alert trail for failed and exhausted
//! deliveries.

mod log;
mod notification;

pub use log::{InMemoryNotificationLog, NotificationLog, NotifyError};
pub use notification::{Notification, NotificationLevel};
