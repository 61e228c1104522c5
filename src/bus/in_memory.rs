//! In-memory broker for testing and single-process scenarios.
//!
//! This module provides a thread-safe, partitioned in-memory broker that
//! implements `Publisher`, `Sender`, and (via subscriptions) `Subscriber`,
//! useful for:
//! - Unit and integration testing without external dependencies
//! - Single-process applications
//! - Development and prototyping

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use super::event::{DeliveredEvent, Event};
use super::publisher::{PublishError, Publisher, Sender};
use super::subscriber::{Subscribable, Subscriber};

#[derive(Clone, Debug)]
struct StoredRecord {
    key: Option<String>,
    event: Event,
}

type PartitionLogs = Vec<Vec<StoredRecord>>;

/// In-memory broker with keyed partitions and per-group committed offsets.
///
/// Features:
/// - Thread-safe (can be shared across threads via `Clone`)
/// - Records with the same key land on the same partition, preserving
///   publish order per key; unkeyed records are spread round-robin
/// - Append-only per-partition logs with monotonically increasing offsets
/// - Per consumer-group committed watermarks; a fresh subscription starts
///   at the watermark, so uncommitted records are redelivered
///
/// ## Example
///
/// ```
/// use delivered_rust::bus::{Event, InMemoryBroker, Publisher, Subscriber};
///
/// let broker = InMemoryBroker::new();
///
/// broker
///     .publish(
///         "event.order",
///         Some("order-1"),
///         Event::with_string_payload("evt-1", "OrderCreated", r#"{"id":"1"}"#),
///     )
///     .unwrap();
///
/// let sub = broker.subscribe("order-consumers", "event.order");
/// let delivered = sub.poll(100).unwrap().unwrap();
/// assert_eq!(delivered.event.event_type, "OrderCreated");
///
/// // Manual commit; without it the record is redelivered on re-subscribe.
/// sub.commit(delivered.partition, delivered.offset).unwrap();
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    partitions: u32,
    topics: Arc<RwLock<HashMap<String, PartitionLogs>>>,
    /// (group, topic) -> next offset to read, per partition
    committed: Arc<RwLock<HashMap<(String, String), Vec<u64>>>>,
    unkeyed_cursor: Arc<AtomicU32>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Default number of partitions per topic.
    pub const DEFAULT_PARTITIONS: u32 = 3;

    /// Create a new broker with the default partition count.
    pub fn new() -> Self {
        Self::with_partitions(Self::DEFAULT_PARTITIONS)
    }

    /// Create a new broker with the given partition count per topic.
    pub fn with_partitions(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
            topics: Arc::new(RwLock::new(HashMap::new())),
            committed: Arc::new(RwLock::new(HashMap::new())),
            unkeyed_cursor: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Create a subscriber handle for a consumer group on a topic.
    ///
    /// The handle starts at the group's committed watermark. One handle per
    /// partition-owning consumer is the intended deployment shape; handles
    /// of the same group share commits but poll independently.
    pub fn subscribe(&self, group: impl Into<String>, topic: impl Into<String>) -> InMemorySubscription {
        let group = group.into();
        let topic = topic.into();
        let watermark = self.watermark(&group, &topic);
        InMemorySubscription {
            group,
            topic,
            partitions: self.partitions,
            topics: Arc::clone(&self.topics),
            committed: Arc::clone(&self.committed),
            positions: Arc::new(Mutex::new(watermark)),
        }
    }

    /// Total number of records across a topic's partitions.
    pub fn topic_len(&self, topic: &str) -> usize {
        self.topics
            .read()
            .unwrap()
            .get(topic)
            .map(|logs| logs.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// All events on a topic, in partition-then-offset order.
    pub fn records(&self, topic: &str) -> Vec<Event> {
        self.topics
            .read()
            .unwrap()
            .get(topic)
            .map(|logs| {
                logs.iter()
                    .flat_map(|log| log.iter().map(|r| r.event.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All event types on a topic, in partition-then-offset order.
    pub fn event_types(&self, topic: &str) -> Vec<String> {
        self.records(topic)
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }

    fn watermark(&self, group: &str, topic: &str) -> Vec<u64> {
        self.committed
            .read()
            .unwrap()
            .get(&(group.to_string(), topic.to_string()))
            .cloned()
            .unwrap_or_else(|| vec![0; self.partitions as usize])
    }

    fn partition_for(&self, key: Option<&str>) -> u32 {
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % u64::from(self.partitions)) as u32
            }
            // Unkeyed records carry no ordering contract; spread them.
            None => self.unkeyed_cursor.fetch_add(1, Ordering::Relaxed) % self.partitions,
        }
    }
}

impl Publisher for InMemoryBroker {
    fn publish(&self, topic: &str, key: Option<&str>, event: Event) -> Result<(), PublishError> {
        let partition = self.partition_for(key) as usize;
        let mut topics = self.topics.write().unwrap();
        let logs = topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); self.partitions as usize]);
        logs[partition].push(StoredRecord {
            key: key.map(str::to_string),
            event,
        });
        Ok(())
    }
}

impl Sender for InMemoryBroker {
    fn send(&self, queue: &str, key: Option<&str>, event: Event) -> Result<(), PublishError> {
        // Point-to-point is a consumption contract (one group per queue
        // topic); the storage path is the same.
        self.publish(queue, key, event)
    }
}

/// A consumer-group subscription to one topic of an `InMemoryBroker`.
///
/// Polling advances a private cursor; `commit` advances the group's durable
/// watermark. A handle created after a crash (or via `new_subscriber`)
/// resumes from the watermark, redelivering anything polled but not
/// committed.
#[derive(Clone)]
pub struct InMemorySubscription {
    group: String,
    topic: String,
    partitions: u32,
    topics: Arc<RwLock<HashMap<String, PartitionLogs>>>,
    committed: Arc<RwLock<HashMap<(String, String), Vec<u64>>>>,
    positions: Arc<Mutex<Vec<u64>>>,
}

impl InMemorySubscription {
    /// The consumer group this handle belongs to.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// The topic this handle reads.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn try_next(&self) -> Option<DeliveredEvent> {
        let topics = self.topics.read().unwrap();
        let logs = topics.get(&self.topic)?;
        let mut positions = self.positions.lock().unwrap();

        for (partition, log) in logs.iter().enumerate() {
            let pos = positions[partition] as usize;
            if pos < log.len() {
                let record = &log[pos];
                positions[partition] += 1;
                return Some(DeliveredEvent {
                    topic: self.topic.clone(),
                    partition: partition as u32,
                    offset: pos as u64,
                    key: record.key.clone(),
                    event: record.event.clone(),
                });
            }
        }
        None
    }
}

impl Subscriber for InMemorySubscription {
    fn poll(&self, timeout_ms: u64) -> Result<Option<DeliveredEvent>, PublishError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        loop {
            if let Some(delivered) = self.try_next() {
                return Ok(Some(delivered));
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }

            // Small sleep to avoid busy-waiting
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn commit(&self, partition: u32, offset: u64) -> Result<(), PublishError> {
        let mut committed = self.committed.write().unwrap();
        let watermarks = committed
            .entry((self.group.clone(), self.topic.clone()))
            .or_insert_with(|| vec![0; self.partitions as usize]);
        let slot = &mut watermarks[partition as usize];
        *slot = (*slot).max(offset + 1);
        Ok(())
    }
}

impl Subscribable for InMemorySubscription {
    fn new_subscriber(&self) -> Self {
        let watermark = self
            .committed
            .read()
            .unwrap()
            .get(&(self.group.clone(), self.topic.clone()))
            .cloned()
            .unwrap_or_else(|| vec![0; self.partitions as usize]);
        Self {
            group: self.group.clone(),
            topic: self.topic.clone(),
            partitions: self.partitions,
            topics: Arc::clone(&self.topics),
            committed: Arc::clone(&self.committed),
            positions: Arc::new(Mutex::new(watermark)),
        }
    }
}
