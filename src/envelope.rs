//! Typed event envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A typed domain event at the moment of publication.
///
/// Immutable once built: the envelope is created by the producer and owned
/// by it until handed to the broker. `simulate_failure` is a test-injection
/// flag: consumers treat a flagged record's failure exactly like a real
/// one, so the whole retry and recovery path can be exercised end to end.
///
/// ## Example
///
/// ```
/// use delivered_rust::EventEnvelope;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct OrderPlaced {
///     order_id: String,
/// }
///
/// let envelope = EventEnvelope::new(OrderPlaced {
///     order_id: "ord-1".to_string(),
/// });
/// assert!(!envelope.simulate_failure);
///
/// let json = serde_json::to_string(&envelope).unwrap();
/// let back: EventEnvelope<OrderPlaced> = serde_json::from_str(&json).unwrap();
/// assert_eq!(back.id, envelope.id);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventEnvelope<P> {
    /// Unique event identifier, assigned at creation
    pub id: Uuid,
    /// When the event occurred
    pub occurred_at: DateTime<Utc>,
    /// Test injection: a consumer handler fails this record on purpose
    #[serde(default)]
    pub simulate_failure: bool,
    /// The domain payload
    pub payload: P,
}

impl<P> EventEnvelope<P> {
    /// Create an envelope around a payload, with a fresh id and timestamp.
    pub fn new(payload: P) -> Self {
        Self {
            id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            simulate_failure: false,
            payload,
        }
    }

    /// Set the simulate-failure flag.
    pub fn with_simulate_failure(mut self, simulate_failure: bool) -> Self {
        self.simulate_failure = simulate_failure;
        self
    }
}
