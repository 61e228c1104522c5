//! Failure outbox repository - the single coordination point between
//! consumer handoff, the recovery scheduler, and manual retry.

use std::sync::{Arc, RwLock};

use thiserror::Error;
use uuid::Uuid;

use super::failed_message::{FailedMessage, FailedMessageStatus};

/// Error type for outbox operations.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("outbox lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("failed message {0} not found")]
    NotFound(Uuid),
    #[error("a failure for {topic}[{partition}@{offset}] is already recorded")]
    DuplicateSource {
        topic: String,
        partition: u32,
        offset: u64,
    },
    #[error("failed message {0} is already resolved")]
    AlreadyResolved(Uuid),
    #[error("failed message {0} has exhausted its retry budget; re-open it with a forced retry")]
    RetryBudgetExhausted(Uuid),
}

/// Narrow repository interface over the `failed_messages` store.
///
/// `cas_status` is the **only** way any component changes a row's status:
/// a single conditional update that succeeds exactly when the row currently
/// holds the expected state. Reading a status and then writing it
/// unconditionally is forbidden everywhere in this crate: that is how two
/// scheduler instances (or a scheduler and a manual retry) double-publish
/// a row.
///
/// The non-status fields (`retry_count`, `last_retried_at`, `resolved_at`)
/// are written through `update` by whoever holds the `Retrying` lease, so
/// they never see concurrent writers.
pub trait FailureOutbox: Send + Sync {
    /// Persist a new row.
    ///
    /// Fails with `DuplicateSource` when a row for the same
    /// `(topic, partition, offset)` already exists: one logical failure,
    /// one row, even across consumer restarts.
    fn save(&self, message: FailedMessage) -> Result<(), OutboxError>;

    /// Load one row.
    fn get(&self, id: Uuid) -> Result<Option<FailedMessage>, OutboxError>;

    /// Persist the non-status fields of an existing row.
    ///
    /// The stored status is left untouched; only `cas_status` moves it.
    fn update(&self, message: &FailedMessage) -> Result<(), OutboxError>;

    /// Rows filtered by status, or all rows, oldest first.
    fn list_by_status(
        &self,
        status: Option<FailedMessageStatus>,
    ) -> Result<Vec<FailedMessage>, OutboxError>;

    /// Rows eligible for automatic recovery: `Pending` with budget left.
    fn find_pending(&self) -> Result<Vec<FailedMessage>, OutboxError>;

    /// Atomically transition `id` from `from` to `to`.
    ///
    /// Returns `true` when this caller performed the transition, `false`
    /// when the row was not in `from` (someone else got there first, or
    /// the row moved on). `false` is the losing side of the race, not an
    /// error.
    fn cas_status(
        &self,
        id: Uuid,
        from: FailedMessageStatus,
        to: FailedMessageStatus,
    ) -> Result<bool, OutboxError>;
}

/// In-memory failure outbox for testing and single-process scenarios.
///
/// Clones share the same storage; the CAS runs under one write-lock
/// acquisition, which is what a `WHERE status = ?` conditional UPDATE gives
/// a SQL-backed implementation.
#[derive(Clone, Default)]
pub struct InMemoryOutbox {
    rows: Arc<RwLock<Vec<FailedMessage>>>,
}

impl InMemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of rows, any status.
    pub fn len(&self) -> usize {
        self.rows.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Whether the outbox has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FailureOutbox for InMemoryOutbox {
    fn save(&self, message: FailedMessage) -> Result<(), OutboxError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| OutboxError::LockPoisoned("save"))?;

        if let Some(source) = message.source {
            let duplicate = rows
                .iter()
                .any(|row| row.topic == message.topic && row.source == Some(source));
            if duplicate {
                return Err(OutboxError::DuplicateSource {
                    topic: message.topic,
                    partition: source.partition,
                    offset: source.offset,
                });
            }
        }

        rows.push(message);
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<Option<FailedMessage>, OutboxError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| OutboxError::LockPoisoned("get"))?;
        Ok(rows.iter().find(|row| row.id == id).cloned())
    }

    fn update(&self, message: &FailedMessage) -> Result<(), OutboxError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| OutboxError::LockPoisoned("update"))?;
        match rows.iter_mut().find(|row| row.id == message.id) {
            Some(row) => {
                let status = row.status;
                *row = message.clone();
                row.status = status;
                Ok(())
            }
            None => Err(OutboxError::NotFound(message.id)),
        }
    }

    fn list_by_status(
        &self,
        status: Option<FailedMessageStatus>,
    ) -> Result<Vec<FailedMessage>, OutboxError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| OutboxError::LockPoisoned("list"))?;
        let mut matched: Vec<FailedMessage> = rows
            .iter()
            .filter(|row| status.map_or(true, |s| row.status == s))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matched)
    }

    fn find_pending(&self) -> Result<Vec<FailedMessage>, OutboxError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| OutboxError::LockPoisoned("find_pending"))?;
        let mut matched: Vec<FailedMessage> = rows
            .iter()
            .filter(|row| row.is_pending() && row.budget_left())
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matched)
    }

    fn cas_status(
        &self,
        id: Uuid,
        from: FailedMessageStatus,
        to: FailedMessageStatus,
    ) -> Result<bool, OutboxError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| OutboxError::LockPoisoned("cas_status"))?;
        match rows.iter_mut().find(|row| row.id == id) {
            Some(row) if row.status == from => {
                row.status = to;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(OutboxError::NotFound(id)),
        }
    }
}
