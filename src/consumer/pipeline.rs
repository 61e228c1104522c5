//! Consumer pipeline - per-record processing with bounded retry and
//! handoff to the failure outbox.

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::bus::DeliveredEvent;
use crate::notify::{Notification, NotificationLevel, NotificationLog};
use crate::outbox::{FailedMessage, FailureOutbox, OutboxError};

use super::retry::RetryPolicy;

/// Error returned by a handler. Treated as transient up to the retry
/// budget.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Processes one delivered record.
pub trait EventHandler: Send + Sync {
    fn handle(&self, record: &DeliveredEvent) -> Result<(), HandlerError>;
}

impl<F> EventHandler for F
where
    F: Fn(&DeliveredEvent) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, record: &DeliveredEvent) -> Result<(), HandlerError> {
        self(record)
    }
}

/// How a record left the pipeline. Either way the offset is safe to
/// commit: the record is done, or its failure is durable in the outbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The handler succeeded.
    Acked,
    /// Retries exhausted; the failure is recorded for recovery.
    Recovering,
}

/// Error type for pipeline processing.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The outbox write itself failed. The offset must be withheld so the
    /// broker redelivers the record: durability of the failure belongs to
    /// the outbox, and until the row exists the broker still owns it.
    #[error("failed message handoff failed; offset must be withheld")]
    Handoff(#[source] OutboxError),
}

/// Per-record state machine:
///
/// ```text
/// RECEIVED ──handler ok──────────────────────────► ACKED
///     │ handler error
///     ▼
/// RETRY(n)  n = 1..max_attempts, backoff between attempts
///     │ budget spent
///     ▼
/// RECOVERING: persist FailedMessage (PENDING, retry_count 0)
///             + append ERROR notification (best-effort)
/// ```
///
/// The handoff happens exactly once per exhausted record: a consumer
/// restart that redelivers the record finds the outbox row already present
/// (same topic/partition/offset) and does not create a second one.
pub struct ConsumerPipeline<H, O, N> {
    handler: H,
    outbox: O,
    notifications: N,
    policy: RetryPolicy,
    recovery_budget: u32,
}

impl<H, O, N> ConsumerPipeline<H, O, N>
where
    H: EventHandler,
    O: FailureOutbox,
    N: NotificationLog,
{
    /// Create a pipeline with the default retry policy.
    pub fn new(handler: H, outbox: O, notifications: N) -> Self {
        Self {
            handler,
            outbox,
            notifications,
            policy: RetryPolicy::default(),
            recovery_budget: FailedMessage::DEFAULT_MAX_RETRIES,
        }
    }

    /// Set the in-process retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the recovery budget stamped on rows this pipeline creates.
    pub fn with_recovery_budget(mut self, max_retries: u32) -> Self {
        self.recovery_budget = max_retries;
        self
    }

    /// Process one record to a terminal disposition.
    ///
    /// On `Ok` the caller commits the record's offset; on `Err` it must
    /// withhold it.
    pub fn process(&self, record: &DeliveredEvent) -> Result<Disposition, PipelineError> {
        let mut last_error: Option<HandlerError> = None;

        for attempt in 1..=self.policy.max_attempts {
            match self.handler.handle(record) {
                Ok(()) => {
                    debug!(
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        attempt,
                        "record processed"
                    );
                    return Ok(Disposition::Acked);
                }
                Err(err) => {
                    warn!(
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %err,
                        "handler attempt failed"
                    );
                    last_error = Some(err);
                    if attempt < self.policy.max_attempts {
                        let delay = self.policy.delay_for(attempt);
                        if !delay.is_zero() {
                            std::thread::sleep(delay);
                        }
                    }
                }
            }
        }

        // last_error is always set here: the loop ran at least once and
        // every success returned early.
        let err = last_error.unwrap_or_else(|| "handler failed".into());
        self.hand_off(record, err)
    }

    fn hand_off(
        &self,
        record: &DeliveredEvent,
        err: HandlerError,
    ) -> Result<Disposition, PipelineError> {
        let failed = FailedMessage::new(
            record.topic.clone(),
            record.key.clone(),
            String::from_utf8_lossy(&record.event.payload).into_owned(),
            err.to_string(),
        )
        .with_original_topic(record.topic.clone())
        .with_stack_trace(render_chain(err.as_ref()))
        .with_source(record.partition, record.offset)
        .with_max_retries(self.recovery_budget);
        let failed_id = failed.id;

        match self.outbox.save(failed) {
            Ok(()) => {
                info!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    failed_id = %failed_id,
                    "retries exhausted; failure recorded for recovery"
                );
            }
            Err(OutboxError::DuplicateSource { .. }) => {
                // Redelivery of a record whose failure is already durable
                // (the commit never happened before a restart). Done.
                info!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    "failure already recorded; skipping duplicate handoff"
                );
                return Ok(Disposition::Recovering);
            }
            Err(outbox_err) => {
                error!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %outbox_err,
                    "could not record failure; record stays with the broker"
                );
                return Err(PipelineError::Handoff(outbox_err));
            }
        }

        let notification = Notification::new(
            record.topic.clone(),
            record.event.id.clone(),
            NotificationLevel::Error,
            format!(
                "delivery failed after {} attempts on {}",
                self.policy.max_attempts, record.topic
            ),
        )
        .with_detail(err.to_string());

        // Best-effort: the outbox row is durable either way.
        if let Err(notify_err) = self.notifications.notify_failure(notification) {
            error!(
                topic = %record.topic,
                event_id = %record.event.id,
                error = %notify_err,
                "could not record failure notification"
            );
        }

        Ok(Disposition::Recovering)
    }
}

/// Render an error and its source chain, one cause per line.
fn render_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str("\ncaused by: ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Event;
    use crate::envelope::EventEnvelope;
    use crate::notify::{InMemoryNotificationLog, NotifyError};
    use crate::outbox::{FailedMessageStatus, InMemoryOutbox};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    /// Handler that fails records whose envelope carries the
    /// simulate-failure flag, counting every invocation.
    #[derive(Clone, Default)]
    struct FlagSensitiveHandler {
        calls: Arc<AtomicUsize>,
    }

    impl EventHandler for FlagSensitiveHandler {
        fn handle(&self, record: &DeliveredEvent) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let envelope: EventEnvelope<serde_json::Value> =
                record.event.decode().map_err(|e| Box::new(e) as HandlerError)?;
            if envelope.simulate_failure {
                return Err("simulated processing failure".into());
            }
            Ok(())
        }
    }

    fn record_with_flag(simulate_failure: bool) -> DeliveredEvent {
        let envelope = EventEnvelope::new(serde_json::json!({"order_id": "order-1"}))
            .with_simulate_failure(simulate_failure);
        let event = Event::encode(envelope.id.to_string(), "OrderPlaced", &envelope).unwrap();
        DeliveredEvent {
            topic: "event.order".to_string(),
            partition: 1,
            offset: 7,
            key: Some("order-1".to_string()),
            event,
        }
    }

    fn pipeline(
        handler: FlagSensitiveHandler,
    ) -> (
        ConsumerPipeline<FlagSensitiveHandler, InMemoryOutbox, InMemoryNotificationLog>,
        InMemoryOutbox,
        InMemoryNotificationLog,
    ) {
        let outbox = InMemoryOutbox::new();
        let notifications = InMemoryNotificationLog::new();
        let pipeline = ConsumerPipeline::new(handler, outbox.clone(), notifications.clone())
            .with_retry_policy(RetryPolicy::fixed(3, Duration::ZERO));
        (pipeline, outbox, notifications)
    }

    #[test]
    fn healthy_record_is_acked_first_try() {
        let handler = FlagSensitiveHandler::default();
        let (pipeline, outbox, notifications) = pipeline(handler.clone());

        let disposition = pipeline.process(&record_with_flag(false)).unwrap();
        assert_eq!(disposition, Disposition::Acked);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(outbox.is_empty());
        assert!(notifications.is_empty());
    }

    #[test]
    fn simulated_failure_exhausts_retries_and_hands_off() {
        // Scenario: one flagged record; three in-process attempts; one
        // PENDING row with a zeroed retry history; one ERROR notification.
        let handler = FlagSensitiveHandler::default();
        let (pipeline, outbox, notifications) = pipeline(handler.clone());
        let record = record_with_flag(true);

        let disposition = pipeline.process(&record).unwrap();
        assert_eq!(disposition, Disposition::Recovering);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);

        let rows = outbox.list_by_status(None).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.status, FailedMessageStatus::Pending);
        assert_eq!(row.retry_count, 0);
        assert_eq!(row.topic, "event.order");
        assert_eq!(row.original_topic.as_deref(), Some("event.order"));
        assert_eq!(row.message_key.as_deref(), Some("order-1"));
        assert_eq!(row.error_message, "simulated processing failure");
        assert!(row.stack_trace.is_some());
        assert_eq!(row.source.map(|s| (s.partition, s.offset)), Some((1, 7)));
        // The stored payload is the record body, replayable as-is.
        let envelope: EventEnvelope<serde_json::Value> =
            serde_json::from_str(&row.payload).unwrap();
        assert!(envelope.simulate_failure);

        let alerts = notifications.unacknowledged().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, NotificationLevel::Error);
        assert_eq!(alerts[0].event_id, record.event.id);
    }

    #[test]
    fn redelivered_record_does_not_create_a_second_row() {
        let handler = FlagSensitiveHandler::default();
        let (pipeline, outbox, notifications) = pipeline(handler);
        let record = record_with_flag(true);

        pipeline.process(&record).unwrap();
        // Restart before the offset commit: the broker hands us the same
        // record again.
        let disposition = pipeline.process(&record).unwrap();

        assert_eq!(disposition, Disposition::Recovering);
        assert_eq!(outbox.len(), 1);
        // Only the first handoff raised an alert.
        assert_eq!(notifications.len(), 1);
    }

    #[test]
    fn outbox_write_failure_withholds_the_offset() {
        #[derive(Clone, Default)]
        struct RefusingOutbox;

        impl FailureOutbox for RefusingOutbox {
            fn save(&self, _: FailedMessage) -> Result<(), OutboxError> {
                Err(OutboxError::LockPoisoned("save"))
            }
            fn get(&self, _: Uuid) -> Result<Option<FailedMessage>, OutboxError> {
                Ok(None)
            }
            fn update(&self, _: &FailedMessage) -> Result<(), OutboxError> {
                Ok(())
            }
            fn list_by_status(
                &self,
                _: Option<FailedMessageStatus>,
            ) -> Result<Vec<FailedMessage>, OutboxError> {
                Ok(Vec::new())
            }
            fn find_pending(&self) -> Result<Vec<FailedMessage>, OutboxError> {
                Ok(Vec::new())
            }
            fn cas_status(
                &self,
                _: Uuid,
                _: FailedMessageStatus,
                _: FailedMessageStatus,
            ) -> Result<bool, OutboxError> {
                Ok(false)
            }
        }

        let pipeline = ConsumerPipeline::new(
            FlagSensitiveHandler::default(),
            RefusingOutbox,
            InMemoryNotificationLog::new(),
        )
        .with_retry_policy(RetryPolicy::fixed(2, Duration::ZERO));

        let result = pipeline.process(&record_with_flag(true));
        assert!(matches!(result, Err(PipelineError::Handoff(_))));
    }

    #[test]
    fn notification_failure_does_not_unwind_the_handoff() {
        #[derive(Clone, Default)]
        struct RefusingLog;

        impl NotificationLog for RefusingLog {
            fn notify_failure(&self, _: Notification) -> Result<Uuid, NotifyError> {
                Err(NotifyError::LockPoisoned("insert"))
            }
            fn acknowledge(&self, id: Uuid) -> Result<(), NotifyError> {
                Err(NotifyError::NotFound(id))
            }
            fn unacknowledged(&self) -> Result<Vec<Notification>, NotifyError> {
                Ok(Vec::new())
            }
            fn by_topic(&self, _: &str) -> Result<Vec<Notification>, NotifyError> {
                Ok(Vec::new())
            }
        }

        let outbox = InMemoryOutbox::new();
        let pipeline =
            ConsumerPipeline::new(FlagSensitiveHandler::default(), outbox.clone(), RefusingLog)
                .with_retry_policy(RetryPolicy::fixed(1, Duration::ZERO));

        // The outbox row lands and the record is considered handed off
        // even though the notification insert failed.
        let disposition = pipeline.process(&record_with_flag(true)).unwrap();
        assert_eq!(disposition, Disposition::Recovering);
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn error_chain_is_rendered_into_the_stack_trace() {
        #[derive(Debug)]
        struct Outer(std::io::Error);

        impl std::fmt::Display for Outer {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "downstream call failed")
            }
        }

        impl std::error::Error for Outer {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                Some(&self.0)
            }
        }

        let handler = |_: &DeliveredEvent| -> Result<(), HandlerError> {
            Err(Box::new(Outer(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))))
        };

        let outbox = InMemoryOutbox::new();
        let pipeline = ConsumerPipeline::new(handler, outbox.clone(), InMemoryNotificationLog::new())
            .with_retry_policy(RetryPolicy::fixed(1, Duration::ZERO));

        pipeline.process(&record_with_flag(false)).unwrap();
        let row = &outbox.list_by_status(None).unwrap()[0];
        assert_eq!(row.error_message, "downstream call failed");
        let trace = row.stack_trace.as_deref().unwrap();
        assert!(trace.contains("caused by: connection refused"));
    }
}
