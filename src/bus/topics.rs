//! Topic naming conventions.
//!
//! Two families of topics:
//! - `event.{domain}` for fan-out: multiple independent consumer groups each
//!   receive every record.
//! - `queue.{domain}.{action}` for point-to-point: a single consumer group
//!   processes each record.
//!
//! Records that could not be processed after retries land on a dead-letter
//! topic named `{topic}.DLT`.

/// Fan-out topic for a domain: `event.{domain}`.
pub fn event_topic(domain: &str) -> String {
    format!("event.{domain}")
}

/// Point-to-point topic for a domain action: `queue.{domain}.{action}`.
pub fn queue_topic(domain: &str, action: &str) -> String {
    format!("queue.{domain}.{action}")
}

/// Dead-letter topic for a topic: `{topic}.DLT`.
pub fn dead_letter_topic(topic: &str) -> String {
    format!("{topic}.DLT")
}
