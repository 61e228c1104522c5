//! Recovery service - republishes failed messages and drives their state
//! machine.
//!
//! One publish-and-transition primitive serves both callers: the periodic
//! scheduler (`retry_all_pending`) and the operator facade (`retry_by_id`,
//! `retry_by_id_forced`). Both acquire the row through the same
//! `Pending → Retrying` compare-and-set, so a scheduler tick and a manual
//! retry racing on one row can never both republish it.

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bus::{Event, Publisher};
use crate::notify::{Notification, NotificationLevel, NotificationLog};

use super::failed_message::{FailedMessage, FailedMessageStatus};
use super::repository::{FailureOutbox, OutboxError};

/// Republishes failed messages with bounded retries.
///
/// Owns no schedule of its own; `RecoverySchedulerThread` ticks it, and
/// operators call it directly. All collaborators arrive by constructor.
pub struct RecoveryService<O, P, N> {
    outbox: O,
    publisher: P,
    notifications: N,
}

impl<O, P, N> RecoveryService<O, P, N>
where
    O: FailureOutbox,
    P: Publisher,
    N: NotificationLog,
{
    /// Create a recovery service over explicit handles.
    pub fn new(outbox: O, publisher: P, notifications: N) -> Self {
        Self {
            outbox,
            publisher,
            notifications,
        }
    }

    /// Read-only triage view over the outbox, optionally filtered by
    /// status.
    pub fn list_failed_messages(
        &self,
        status: Option<FailedMessageStatus>,
    ) -> Result<Vec<FailedMessage>, OutboxError> {
        self.outbox.list_by_status(status)
    }

    /// Immediately retry one row, returning the status it ended in.
    ///
    /// Policy for terminal rows: a `Success` row is rejected with
    /// `AlreadyResolved`; an `Exhausted` row is rejected with
    /// `RetryBudgetExhausted` (use [`retry_by_id_forced`] to re-open it).
    /// A row currently `Retrying` belongs to another caller; the retry
    /// observes the no-op and returns `Retrying`.
    ///
    /// [`retry_by_id_forced`]: Self::retry_by_id_forced
    pub fn retry_by_id(&self, id: Uuid) -> Result<FailedMessageStatus, OutboxError> {
        self.retry_message(id, false)
    }

    /// Like [`retry_by_id`], but re-opens an `Exhausted` row.
    ///
    /// The forced attempt does not grow `retry_count` past `max_retries`;
    /// on failure the row returns to `Exhausted`.
    ///
    /// [`retry_by_id`]: Self::retry_by_id
    pub fn retry_by_id_forced(&self, id: Uuid) -> Result<FailedMessageStatus, OutboxError> {
        self.retry_message(id, true)
    }

    /// Run one recovery pass over every eligible `Pending` row.
    ///
    /// Returns the number of rows this caller claimed and attempted. Rows
    /// claimed by a concurrent scheduler instance or manual retry between
    /// the select and the CAS are skipped; one row's error never aborts
    /// the rest of the batch.
    pub fn retry_all_pending(&self) -> usize {
        let pending = match self.outbox.find_pending() {
            Ok(rows) => rows,
            Err(err) => {
                error!(%err, "could not select pending failed messages");
                return 0;
            }
        };

        let mut attempted = 0;
        for row in pending {
            match self.outbox.cas_status(
                row.id,
                FailedMessageStatus::Pending,
                FailedMessageStatus::Retrying,
            ) {
                Ok(true) => {
                    attempted += 1;
                    if let Err(err) = self.deliver(row.id) {
                        error!(id = %row.id, %err, "recovery attempt errored");
                    }
                }
                // Someone else holds the lease; not ours this cycle.
                Ok(false) => {}
                Err(err) => {
                    error!(id = %row.id, %err, "lease acquisition errored");
                }
            }
        }
        attempted
    }

    fn retry_message(&self, id: Uuid, force: bool) -> Result<FailedMessageStatus, OutboxError> {
        let row = self.outbox.get(id)?.ok_or(OutboxError::NotFound(id))?;

        let from = match row.status {
            FailedMessageStatus::Success => return Err(OutboxError::AlreadyResolved(id)),
            FailedMessageStatus::Exhausted if !force => {
                return Err(OutboxError::RetryBudgetExhausted(id))
            }
            FailedMessageStatus::Exhausted => FailedMessageStatus::Exhausted,
            FailedMessageStatus::Retrying => return Ok(FailedMessageStatus::Retrying),
            FailedMessageStatus::Pending => FailedMessageStatus::Pending,
        };

        if !self
            .outbox
            .cas_status(id, from, FailedMessageStatus::Retrying)?
        {
            // Lost the race between load and CAS; report what the row
            // says now instead of erroring.
            let row = self.outbox.get(id)?.ok_or(OutboxError::NotFound(id))?;
            return Ok(row.status);
        }

        self.deliver(id)
    }

    /// Publish one claimed row and resolve its lease.
    ///
    /// Precondition: the caller just won the CAS into `Retrying`.
    fn deliver(&self, id: Uuid) -> Result<FailedMessageStatus, OutboxError> {
        let mut row = self.outbox.get(id)?.ok_or(OutboxError::NotFound(id))?;
        row.begin_retry(Utc::now());
        self.outbox.update(&row)?;

        let topic = row.republish_topic().to_string();
        let event = Event::with_string_payload(row.id.to_string(), &topic, row.payload.clone());

        match self
            .publisher
            .publish(&topic, row.message_key.as_deref(), event)
        {
            Ok(()) => {
                row.mark_resolved(Utc::now());
                self.outbox.update(&row)?;
                self.release(id, FailedMessageStatus::Success)?;
                info!(
                    id = %id,
                    %topic,
                    retry_count = row.retry_count,
                    "failed message recovered"
                );
                Ok(FailedMessageStatus::Success)
            }
            Err(err) if row.budget_left() => {
                self.release(id, FailedMessageStatus::Pending)?;
                warn!(
                    id = %id,
                    %topic,
                    retry_count = row.retry_count,
                    max_retries = row.max_retries,
                    %err,
                    "recovery attempt failed; row stays pending"
                );
                Ok(FailedMessageStatus::Pending)
            }
            Err(err) => {
                self.release(id, FailedMessageStatus::Exhausted)?;
                error!(
                    id = %id,
                    %topic,
                    retry_count = row.retry_count,
                    %err,
                    "retry budget exhausted; operator action required"
                );
                self.escalate(&row, &err.to_string());
                Ok(FailedMessageStatus::Exhausted)
            }
        }
    }

    fn release(&self, id: Uuid, to: FailedMessageStatus) -> Result<(), OutboxError> {
        if !self
            .outbox
            .cas_status(id, FailedMessageStatus::Retrying, to)?
        {
            // The lease protocol makes this unreachable; a broken store is
            // worth a loud log rather than a panic.
            warn!(id = %id, %to, "lease was not held at release");
        }
        Ok(())
    }

    fn escalate(&self, row: &FailedMessage, detail: &str) {
        let notification = Notification::new(
            row.topic.clone(),
            row.id.to_string(),
            NotificationLevel::Critical,
            format!(
                "delivery exhausted after {} recovery attempts on {}",
                row.retry_count,
                row.republish_topic()
            ),
        )
        .with_detail(detail);

        // Best-effort: the exhausted row is already durable.
        if let Err(err) = self.notifications.notify_failure(notification) {
            error!(id = %row.id, %err, "could not record escalation notification");
        }
    }
}
