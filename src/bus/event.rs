//! Event records as they cross the broker.

use serde::{de::DeserializeOwned, Serialize};

/// An event to be published to the broker.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// Unique identifier for this event
    pub id: String,
    /// Event type (e.g., "OrderCreated", "PaymentSucceeded")
    pub event_type: String,
    /// Serialized payload (JSON text as bytes)
    pub payload: Vec<u8>,
    /// Optional metadata (headers, correlation IDs, etc.)
    pub metadata: Option<Vec<(String, String)>>,
}

impl Event {
    /// Create a new event with the given type and payload.
    pub fn new(id: impl Into<String>, event_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            payload,
            metadata: None,
        }
    }

    /// Create an event with a JSON-serialized payload.
    pub fn encode<T: Serialize>(
        id: impl Into<String>,
        event_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        let bytes = serde_json::to_vec(payload)?;
        Ok(Self::new(id, event_type, bytes))
    }

    /// Decode the payload from JSON.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Create an event with a string payload.
    pub fn with_string_payload(
        id: impl Into<String>,
        event_type: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self::new(id, event_type, payload.into().into_bytes())
    }

    /// Add metadata to the event.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(Vec::new)
            .push((key.into(), value.into()));
        self
    }

    /// Get the payload as a string (if valid UTF-8).
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// An event as delivered to a consumer, with its position on the broker.
///
/// The position (`partition`, `offset`) is what the consumer commits after
/// processing, never before. An uncommitted record is redelivered when the
/// consumer re-subscribes.
#[derive(Clone, Debug, PartialEq)]
pub struct DeliveredEvent {
    /// Topic the record was read from
    pub topic: String,
    /// Partition within the topic
    pub partition: u32,
    /// Offset within the partition
    pub offset: u64,
    /// Partition key the record was published with
    pub key: Option<String>,
    /// The event itself
    pub event: Event,
}

impl DeliveredEvent {
    /// Get the payload as a string (if valid UTF-8).
    pub fn payload_str(&self) -> Option<&str> {
        self.event.payload_str()
    }
}
