//! At-least-once event delivery: keyed publishing, bounded consumer retry,
//! a durable failure outbox, scheduled recovery, and operator tooling.
//!
//! ## Data flow
//!
//! ```text
//! EventProducer ──publish(topic, key)──► Broker
//!                                          │
//!                                          ▼
//!                              ConsumerPipeline (retry ×N)
//!                               │ success          │ exhausted
//!                               ▼                  ▼
//!                             ACKED       FailureOutbox + NotificationLog
//!                                                  │
//!                         RecoverySchedulerThread / manual retry
//!                                                  │
//!                                          republish ──► Broker ──► ...
//! ```
//!
//! Delivery is at-least-once by construction: offsets are committed only
//! after a record's outcome is durable, and recovered messages are
//! republished to their original topic. Downstream consumers must tolerate
//! duplicates.

pub mod bus;
mod consumer;
mod envelope;
mod notify;
mod outbox;
mod producer;

pub use consumer::{
    Backoff, ConsumerPipeline, ConsumerWorkerThread, Disposition, EventHandler, HandlerError,
    PipelineError, RetryPolicy, WorkerStats,
};
pub use envelope::EventEnvelope;
pub use notify::{
    InMemoryNotificationLog, Notification, NotificationLevel, NotificationLog, NotifyError,
};
pub use outbox::{
    FailedMessage, FailedMessageStatus, FailureOutbox, InMemoryOutbox, OutboxError, RecordRef,
    RecoveryService, RecoverySchedulerThread, SchedulerStats,
};
pub use producer::EventProducer;
