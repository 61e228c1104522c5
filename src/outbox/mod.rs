//! Failure outbox - durable recovery for deliveries that exhausted their
//! in-process retries.
//!
//! ## Architecture
//!
//! ```text
//! ConsumerPipeline ──handoff──► FailureOutbox (PENDING rows)
//!                                    │
//!              ┌─────────────────────┼──────────────────────┐
//!              ▼                     ▼                      │
//!   RecoverySchedulerThread    RecoveryService.retry_by_id  │
//!   (fixed-interval batch)     (operator, single or bulk)   │
//!              │                     │                      │
//!              └────── CAS PENDING→RETRYING (lease) ────────┘
//!                              │
//!                   publish to original topic
//!                   ok → SUCCESS   fail → PENDING | EXHAUSTED
//! ```
//!
//! The status field is the lease: every transition goes through
//! `FailureOutbox::cas_status`, so concurrent scheduler instances and
//! manual retries serialize per row.

mod failed_message;
mod recovery;
mod repository;
mod scheduler;

pub use failed_message::{FailedMessage, FailedMessageStatus, RecordRef};
pub use recovery::RecoveryService;
pub use repository::{FailureOutbox, InMemoryOutbox, OutboxError};
pub use scheduler::{RecoverySchedulerThread, SchedulerStats};
