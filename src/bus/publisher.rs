//! Core publisher traits for the broker abstraction.

use thiserror::Error;

use super::event::Event;

/// Error type for publish operations.
///
/// A `Timeout` counts as a failed attempt for retry accounting: a publish
/// that never hears the broker's acknowledgment cannot be treated as
/// delivered.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Connection to the broker failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// Serialization of the event failed
    #[error("serialization failed: {0}")]
    SerializationFailed(String),
    /// The broker rejected the event
    #[error("event rejected: {0}")]
    Rejected(String),
    /// Timeout waiting for acknowledgment
    #[error("publish timeout")]
    Timeout,
    /// Other error
    #[error("publish error: {0}")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Trait for publishing events to a message broker.
///
/// `publish` is synchronous: it returns only once the broker has
/// acknowledged the record (or the implementation's timeout elapsed).
/// Records published with the same `key` land on the same partition, so
/// events for one logical entity are delivered in publish order. There is
/// no ordering guarantee across keys.
///
/// Implementations might include:
/// - `InMemoryBroker` - For testing and single-process scenarios
/// - `KafkaPublisher` - For Apache Kafka
/// - `NatsPublisher` - For NATS
pub trait Publisher: Send + Sync {
    /// Publish a single event to a topic, keyed for partitioning.
    ///
    /// Blocks until the broker acknowledges, bounded by the
    /// implementation's publish timeout.
    fn publish(&self, topic: &str, key: Option<&str>, event: Event) -> Result<(), PublishError>;
}

/// Trait for sending events to a named queue (point-to-point).
///
/// Unlike `Publisher` (fan-out on `event.*` topics, every consumer group
/// sees the record), `Sender` delivers to a `queue.*` topic where a single
/// consumer group processes each record.
pub trait Sender: Send + Sync {
    /// Send an event to a named queue.
    fn send(&self, queue: &str, key: Option<&str>, event: Event) -> Result<(), PublishError>;
}
