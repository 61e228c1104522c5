//! Core subscriber trait for the broker abstraction.

use super::event::DeliveredEvent;
use super::publisher::PublishError;

/// Trait for consuming events from a message broker.
///
/// A subscriber handle belongs to one consumer group on one topic. This is
/// a pull-based interface with **manual offset commit**: the broker
/// considers a record delivered only once `commit` is called for its
/// position. A record that was polled but never committed is delivered
/// again to the next subscriber handle the group creates (crash-restart
/// semantics). This is the at-least-once contract.
pub trait Subscriber: Send + Sync {
    /// Poll for the next event, blocking until one is available or timeout.
    fn poll(&self, timeout_ms: u64) -> Result<Option<DeliveredEvent>, PublishError>;

    /// Commit the consumer group's position on a partition.
    ///
    /// Commits everything up to and including `offset`. Never called
    /// automatically.
    fn commit(&self, partition: u32, offset: u64) -> Result<(), PublishError>;
}

/// Trait for subscribers that can create independent subscriber instances.
///
/// A fresh handle starts from the group's committed watermark, so
/// uncommitted records are redelivered to it.
pub trait Subscribable: Subscriber + Sized {
    /// Create a new subscriber handle for the same group and topic.
    fn new_subscriber(&self) -> Self;
}
