//! Event producer - builds envelopes and publishes them keyed.

use serde::Serialize;
use tracing::{debug, error};
use uuid::Uuid;

use crate::bus::{Event, Publisher};
use crate::envelope::EventEnvelope;

/// Publishes typed event envelopes to the broker.
///
/// All events published with the same `key` land on the same partition, so
/// everything about one logical entity (one order, one payment) is consumed
/// in publish order.
///
/// Producer-side transport failures are logged and dropped; they never
/// reach the failure outbox. The outbox records *processing* failures
/// observed by consumers, not transport failures observed by producers.
///
/// ## Example
///
/// ```ignore
/// let producer = EventProducer::new(broker.clone());
///
/// let id = producer.publish("event.order", "order-42", "OrderPlaced", OrderPlaced {
///     order_id: "order-42".to_string(),
/// });
/// assert!(id.is_some());
/// ```
pub struct EventProducer<B> {
    publisher: B,
}

impl<B: Publisher> EventProducer<B> {
    /// Create a producer over an explicit broker handle.
    pub fn new(publisher: B) -> Self {
        Self { publisher }
    }

    /// Build an envelope around `payload` and publish it.
    ///
    /// Returns the assigned event id once the broker acknowledged, `None`
    /// if the record was dropped (serialization or transport failure).
    pub fn publish<P: Serialize>(
        &self,
        topic: &str,
        key: &str,
        event_type: &str,
        payload: P,
    ) -> Option<Uuid> {
        self.publish_envelope(topic, key, event_type, &EventEnvelope::new(payload))
    }

    /// Publish a payload wrapped in an envelope flagged for simulated
    /// failure, test traffic that exercises the full recovery path.
    pub fn publish_failing<P: Serialize>(
        &self,
        topic: &str,
        key: &str,
        event_type: &str,
        payload: P,
    ) -> Option<Uuid> {
        let envelope = EventEnvelope::new(payload).with_simulate_failure(true);
        self.publish_envelope(topic, key, event_type, &envelope)
    }

    /// Publish an already-built envelope.
    pub fn publish_envelope<P: Serialize>(
        &self,
        topic: &str,
        key: &str,
        event_type: &str,
        envelope: &EventEnvelope<P>,
    ) -> Option<Uuid> {
        let event = match Event::encode(envelope.id.to_string(), event_type, envelope) {
            Ok(event) => event,
            Err(err) => {
                error!(topic, key, %err, "dropping event: envelope serialization failed");
                return None;
            }
        };

        match self.publisher.publish(topic, Some(key), event) {
            Ok(()) => {
                debug!(topic, key, event_id = %envelope.id, "event acknowledged");
                Some(envelope.id)
            }
            Err(err) => {
                error!(topic, key, event_id = %envelope.id, %err, "dropping event: publish failed");
                None
            }
        }
    }
}
