//! Failed message records - the rows of the durable failure outbox.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a failed message.
///
/// ```text
///            scheduler / manual pick-up
/// PENDING ─────────────────────────────► RETRYING
///    ▲                                      │
///    │ publish fails, budget left           │ publish ok
///    └──────────────────────────────────────┤
///                                           ▼
///                        SUCCESS ◄──────────┘
///                        EXHAUSTED ◄── publish fails, budget spent
/// ```
///
/// `Success` and `Exhausted` are terminal under automatic processing; only
/// a forced manual retry re-enters an `Exhausted` row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailedMessageStatus {
    #[default]
    Pending,
    Retrying,
    Success,
    Exhausted,
}

impl fmt::Display for FailedMessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailedMessageStatus::Pending => write!(f, "PENDING"),
            FailedMessageStatus::Retrying => write!(f, "RETRYING"),
            FailedMessageStatus::Success => write!(f, "SUCCESS"),
            FailedMessageStatus::Exhausted => write!(f, "EXHAUSTED"),
        }
    }
}

/// Broker position of the record whose processing failed.
///
/// Together with the topic this is the natural key of a failed message: a
/// consumer restart that reprocesses an uncommitted record must not grow a
/// second row for the same failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    pub partition: u32,
    pub offset: u64,
}

/// A delivery that exhausted its in-process retries, persisted for
/// recovery.
///
/// One terminal failure produces exactly one row. The row's `status` field
/// doubles as the lease between the recovery scheduler and manual retry:
/// whoever wins the `Pending → Retrying` compare-and-set owns the row until
/// the attempt resolves.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailedMessage {
    pub id: Uuid,
    /// Topic where the terminal failure occurred
    pub topic: String,
    /// Partition key the record was published with
    pub message_key: Option<String>,
    /// Serialized event body (JSON text)
    pub payload: String,
    /// Message of the final error
    pub error_message: String,
    /// Topic to republish to; defaults to `topic` when absent
    pub original_topic: Option<String>,
    /// Rendered error chain of the final error
    pub stack_trace: Option<String>,
    pub status: FailedMessageStatus,
    /// Recovery attempts made so far; never exceeds `max_retries`
    pub retry_count: u32,
    /// Retry budget, fixed at creation
    pub max_retries: u32,
    /// Broker position of the failing record, when known
    pub source: Option<RecordRef>,
    pub created_at: DateTime<Utc>,
    pub last_retried_at: Option<DateTime<Utc>>,
    /// Set exactly when the row reaches `Success`
    pub resolved_at: Option<DateTime<Utc>>,
}

impl FailedMessage {
    /// Default recovery budget.
    pub const DEFAULT_MAX_RETRIES: u32 = 5;

    /// Create a fresh `Pending` row with an empty retry history.
    pub fn new(
        topic: impl Into<String>,
        message_key: Option<String>,
        payload: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            message_key,
            payload: payload.into(),
            error_message: error_message.into(),
            original_topic: None,
            stack_trace: None,
            status: FailedMessageStatus::Pending,
            retry_count: 0,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            source: None,
            created_at: Utc::now(),
            last_retried_at: None,
            resolved_at: None,
        }
    }

    /// Set the topic to republish to when it differs from `topic`.
    pub fn with_original_topic(mut self, original_topic: impl Into<String>) -> Self {
        self.original_topic = Some(original_topic.into());
        self
    }

    /// Attach the rendered error chain of the final error.
    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    /// Record the broker position of the failing record.
    pub fn with_source(mut self, partition: u32, offset: u64) -> Self {
        self.source = Some(RecordRef { partition, offset });
        self
    }

    /// Override the retry budget (fixed for the row's lifetime).
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    // Queries

    pub fn is_pending(&self) -> bool {
        self.status == FailedMessageStatus::Pending
    }

    pub fn is_retrying(&self) -> bool {
        self.status == FailedMessageStatus::Retrying
    }

    pub fn is_resolved(&self) -> bool {
        self.status == FailedMessageStatus::Success
    }

    pub fn is_exhausted(&self) -> bool {
        self.status == FailedMessageStatus::Exhausted
    }

    /// Whether another automatic attempt is allowed.
    pub fn budget_left(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Topic a recovery attempt republishes to.
    pub fn republish_topic(&self) -> &str {
        self.original_topic.as_deref().unwrap_or(&self.topic)
    }

    // Bookkeeping, written by the lease holder only (the caller that won
    // the CAS into `Retrying`).

    /// Account for a recovery attempt starting now.
    ///
    /// The count is clamped at `max_retries` so a forced retry of an
    /// exhausted row cannot break the budget invariant.
    pub fn begin_retry(&mut self, now: DateTime<Utc>) {
        if self.retry_count < self.max_retries {
            self.retry_count += 1;
        }
        self.last_retried_at = Some(now);
    }

    /// Stamp the resolution time.
    pub fn mark_resolved(&mut self, now: DateTime<Utc>) {
        self.resolved_at = Some(now);
    }
}
