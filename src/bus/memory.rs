//! In-memory partitioned bus.
//!
//! A process-local stand-in for the durable log: append-only topic logs
//! split into partitions, keyed partitioning via a stable hash of the record
//! key, and consumer groups with shared committed offsets. Used by the demo
//! runner and the test suite; production deployments front a real broker
//! behind the same traits.
//!
//! Partition assignment is static: a consumer claims every partition of its
//! topic not already claimed by an earlier member of the same group. There
//! is no rebalancing - within one process the normal shape is one consumer
//! per stage, which claims everything.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

use super::{BusConsumer, BusError, BusProducer, BusRecord, MessageBus, Polled};
use crate::types::now_ms;

/// One stored record (topic/partition/offset are implied by position).
#[derive(Debug, Clone)]
struct StoredRecord {
    key: String,
    payload: Vec<u8>,
    timestamp: i64,
}

/// A topic: fixed partition count, append-only logs.
#[derive(Debug)]
struct TopicLog {
    partitions: Vec<Vec<StoredRecord>>,
}

impl TopicLog {
    fn new(partitions: u32) -> Self {
        Self {
            partitions: (0..partitions.max(1)).map(|_| Vec::new()).collect(),
        }
    }
}

/// Shared bus state behind one mutex; contention is irrelevant at in-process
/// demo/test scale.
#[derive(Debug, Default)]
struct BusState {
    topics: HashMap<String, TopicLog>,
    /// (group, topic, partition) -> next offset to deliver.
    offsets: HashMap<(String, String, u32), u64>,
    /// (group, topic) -> partitions already claimed by group members.
    claimed: HashMap<(String, String), Vec<u32>>,
}

struct Shared {
    state: Mutex<BusState>,
    /// Wakes parked consumers on append and on close.
    notify: Notify,
    closed: AtomicBool,
    default_partitions: u32,
}

/// Process-local message bus. Cheap to clone; clones share the same logs.
#[derive(Clone)]
pub struct InMemoryBus {
    shared: Arc<Shared>,
}

impl InMemoryBus {
    /// Create a bus whose auto-created topics have `partitions` partitions.
    pub fn new(partitions: u32) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BusState::default()),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
                default_partitions: partitions.max(1),
            }),
        }
    }

    /// Close the bus: producers start failing, and consumers that drain
    /// their partitions see [`Polled::Eof`] instead of idling forever.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
    }

    /// Total records appended to `topic` across all partitions.
    pub fn topic_len(&self, topic: &str) -> usize {
        let state = self.lock_state();
        state
            .topics
            .get(topic)
            .map(|t| t.partitions.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Snapshot of every record on `topic` in per-partition order
    /// (partition-major). Test/diagnostic helper.
    pub fn dump_topic(&self, topic: &str) -> Vec<(String, Vec<u8>)> {
        let state = self.lock_state();
        let Some(log) = state.topics.get(topic) else {
            return Vec::new();
        };
        log.partitions
            .iter()
            .flat_map(|p| p.iter().map(|r| (r.key.clone(), r.payload.clone())))
            .collect()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BusState> {
        // Lock poisoning only happens if a holder panicked; the bus state is
        // still structurally sound, so keep serving.
        match self.shared.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn partition_for(key: &str, partitions: usize) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % partitions as u64) as u32
    }
}

impl MessageBus for InMemoryBus {
    fn consumer(&self, topic: &str, group: &str) -> Result<Box<dyn BusConsumer>, BusError> {
        let assigned = {
            let mut state = self.lock_state();
            let partitions = state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| TopicLog::new(self.shared.default_partitions))
                .partitions
                .len() as u32;
            let claimed = state
                .claimed
                .entry((group.to_string(), topic.to_string()))
                .or_default();
            let assigned: Vec<u32> =
                (0..partitions).filter(|p| !claimed.contains(p)).collect();
            claimed.extend(&assigned);
            assigned
        };
        debug!(topic, group, ?assigned, "Consumer joined group");
        Ok(Box::new(MemoryConsumer {
            shared: Arc::clone(&self.shared),
            topic: topic.to_string(),
            group: group.to_string(),
            assigned,
            next_partition: 0,
        }))
    }

    fn producer(&self) -> Result<Box<dyn BusProducer>, BusError> {
        Ok(Box::new(MemoryProducer {
            shared: Arc::clone(&self.shared),
        }))
    }
}

// ============================================================================
// Consumer
// ============================================================================

struct MemoryConsumer {
    shared: Arc<Shared>,
    topic: String,
    group: String,
    assigned: Vec<u32>,
    /// Round-robin cursor over assigned partitions so one hot partition
    /// cannot starve the others.
    next_partition: usize,
}

impl MemoryConsumer {
    /// Try to deliver one record; `None` means fully caught up.
    fn try_next(&mut self) -> Option<BusRecord> {
        let mut state = match self.shared.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let BusState {
            ref topics,
            ref mut offsets,
            ..
        } = *state;
        let log = topics.get(&self.topic)?;
        for step in 0..self.assigned.len() {
            let idx = (self.next_partition + step) % self.assigned.len();
            let partition = self.assigned[idx];
            let committed = offsets
                .entry((self.group.clone(), self.topic.clone(), partition))
                .or_insert(0);
            let records = &log.partitions[partition as usize];
            if (*committed as usize) < records.len() {
                let record = &records[*committed as usize];
                let delivered = BusRecord {
                    topic: self.topic.clone(),
                    partition,
                    offset: *committed,
                    key: record.key.clone(),
                    payload: record.payload.clone(),
                    timestamp: record.timestamp,
                };
                *committed += 1;
                self.next_partition = (idx + 1) % self.assigned.len();
                return Some(delivered);
            }
        }
        None
    }
}

impl Drop for MemoryConsumer {
    /// Leaving the group releases this member's partitions so a later
    /// consumer can claim them; committed offsets persist per group.
    fn drop(&mut self) {
        let mut state = match self.shared.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(claimed) = state
            .claimed
            .get_mut(&(self.group.clone(), self.topic.clone()))
        {
            claimed.retain(|p| !self.assigned.contains(p));
        }
    }
}

#[async_trait]
impl BusConsumer for MemoryConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Polled, BusError> {
        if self.assigned.is_empty() {
            // All partitions claimed by earlier group members.
            tokio::time::sleep(timeout).await;
            return Ok(Polled::Idle);
        }
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(record) = self.try_next() {
                return Ok(Polled::Record(record));
            }
            if self.shared.closed.load(Ordering::SeqCst) {
                return Ok(Polled::Eof);
            }
            let notified = self.shared.notify.notified();
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(Polled::Idle),
            }
        }
    }

    async fn commit(&mut self) -> Result<(), BusError> {
        // Offsets advance at poll time (auto-commit).
        Ok(())
    }
}

// ============================================================================
// Producer
// ============================================================================

struct MemoryProducer {
    shared: Arc<Shared>,
}

#[async_trait]
impl BusProducer for MemoryProducer {
    async fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), BusError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        {
            let mut state = match self.shared.state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let log = state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| TopicLog::new(self.shared.default_partitions));
            let partition = InMemoryBus::partition_for(key, log.partitions.len());
            log.partitions[partition as usize].push(StoredRecord {
                key: key.to_string(),
                payload,
                timestamp: now_ms(),
            });
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> Result<(), BusError> {
        // Appends are synchronous; nothing is ever buffered.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_order_within_a_key() {
        let bus = InMemoryBus::new(3);
        let producer = bus.producer().unwrap();
        for i in 0..10u8 {
            producer.send("t", "actor-1", vec![i]).await.unwrap();
        }
        let mut consumer = bus.consumer("t", "g").unwrap();
        let mut seen = Vec::new();
        for _ in 0..10 {
            match consumer.poll(Duration::from_millis(100)).await.unwrap() {
                Polled::Record(r) => seen.push(r.payload[0]),
                other => panic!("expected record, got {other:?}"),
            }
        }
        assert_eq!(seen, (0..10).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn same_key_lands_on_one_partition() {
        let bus = InMemoryBus::new(4);
        let producer = bus.producer().unwrap();
        for _ in 0..20 {
            producer.send("t", "actor-7", vec![0]).await.unwrap();
        }
        let mut consumer = bus.consumer("t", "g").unwrap();
        let mut partitions = std::collections::HashSet::new();
        for _ in 0..20 {
            if let Polled::Record(r) = consumer.poll(Duration::from_millis(100)).await.unwrap() {
                partitions.insert(r.partition);
            }
        }
        assert_eq!(partitions.len(), 1);
    }

    #[tokio::test]
    async fn idle_on_timeout_then_eof_after_close() {
        let bus = InMemoryBus::new(1);
        let mut consumer = bus.consumer("t", "g").unwrap();
        assert!(matches!(
            consumer.poll(Duration::from_millis(10)).await.unwrap(),
            Polled::Idle
        ));
        bus.close();
        assert!(matches!(
            consumer.poll(Duration::from_millis(10)).await.unwrap(),
            Polled::Eof
        ));
    }

    #[tokio::test]
    async fn separate_groups_see_all_records() {
        let bus = InMemoryBus::new(2);
        let producer = bus.producer().unwrap();
        producer.send("t", "k", b"x".to_vec()).await.unwrap();
        let mut a = bus.consumer("t", "group-a").unwrap();
        let mut b = bus.consumer("t", "group-b").unwrap();
        assert!(matches!(
            a.poll(Duration::from_millis(50)).await.unwrap(),
            Polled::Record(_)
        ));
        assert!(matches!(
            b.poll(Duration::from_millis(50)).await.unwrap(),
            Polled::Record(_)
        ));
    }

    #[tokio::test]
    async fn second_member_of_same_group_gets_no_partitions() {
        let bus = InMemoryBus::new(2);
        let _first = bus.consumer("t", "g").unwrap();
        let mut second = bus.consumer("t", "g").unwrap();
        let producer = bus.producer().unwrap();
        producer.send("t", "k", b"x".to_vec()).await.unwrap();
        assert!(matches!(
            second.poll(Duration::from_millis(10)).await.unwrap(),
            Polled::Idle
        ));
    }
}
