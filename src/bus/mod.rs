//! Broker abstraction - keyed publishing and consumer-group polling.
//!
//! This module provides traits and implementations for moving events
//! through a message broker.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Publisher + Sender + Subscriber Traits          │
//! │  Publisher: publish(topic, key, event)   — fan-out          │
//! │  Sender:    send(queue, key, event)      — point-to-point   │
//! │  Subscriber: poll(timeout) / commit(partition, offset)      │
//! └─────────────────────────────────────────────────────────────┘
//!          │                  │                     │
//!          ▼                  ▼                     ▼
//! ┌──────────────┐    ┌─────────────┐    ┌─────────────────────┐
//! │InMemoryBroker│    │ KafkaBroker │    │ RedisStreamBroker   │
//! │  (included)  │    │ (external)  │    │     (external)      │
//! └──────────────┘    └─────────────┘    └─────────────────────┘
//! ```
//!
//! Records published with the same key land on the same partition, so
//! events for one logical entity are consumed in publish order; there is no
//! ordering guarantee across keys. Offsets are committed manually by the
//! consumer, never automatically.

mod event;
mod in_memory;
mod publisher;
mod subscriber;
mod topics;

pub use event::{DeliveredEvent, Event};
pub use in_memory::{InMemoryBroker, InMemorySubscription};
pub use publisher::{PublishError, Publisher, Sender};
pub use subscriber::{Subscribable, Subscriber};
pub use topics::{dead_letter_topic, event_topic, queue_topic};
