//! Broker abstraction for the credit topics.
//!
//! A broker offers topic-based publish/subscribe with per-key partitioned
//! ordering, consumer groups with committed offsets, and at-least-once
//! delivery. Production deployments plug in a real broker client; the
//! in-memory implementation below backs tests and embedded setups.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Position of a record within a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMeta {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
}

/// A record delivered to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub value: Bytes,
}

impl Record {
    pub fn meta(&self) -> RecordMeta {
        RecordMeta {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset,
        }
    }
}

/// Producer side of the broker.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Broker: Send + Sync {
    /// Append one record to `topic`. Records with equal keys land in the
    /// same partition and keep their relative order.
    async fn publish(&self, topic: &str, key: &str, value: Bytes) -> Result<RecordMeta>;

    /// Join `group_id` on `topic`.
    ///
    /// The consumer starts from the group's last committed offsets.
    async fn subscribe(&self, topic: &str, group_id: &str) -> Result<Box<dyn Consumer>>;
}

/// Consumer side of the broker.
#[async_trait]
pub trait Consumer: Send {
    /// Wait up to `timeout` for the next record.
    ///
    /// Returns None if the timeout expires first.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Record>>;

    /// Commit the record's offset for the group.
    async fn ack(&mut self, record: &Record) -> Result<()>;

    /// Reject the record; it is redelivered by the next poll.
    async fn nack(&mut self, record: &Record) -> Result<()>;

    /// Leave the group. Uncommitted records go to the next consumer.
    async fn close(&mut self) -> Result<()>;
}

/// Partition for a key: stable across processes.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    let hash = blake3::hash(key.as_bytes());
    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(&hash.as_bytes()[..4]);
    u32::from_le_bytes(prefix) % partitions.max(1)
}

/// A simple in-memory broker for testing.
///
/// Topics are created on first use. Each topic is split into a fixed number
/// of append-only partition logs.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::{Mutex, Notify};
    use tokio::time::Instant;

    use crate::error::StreamError;

    /// Default partitions per topic.
    pub const DEFAULT_PARTITIONS: u32 = 4;

    #[derive(Default)]
    struct BrokerState {
        /// topic -> partition logs.
        logs: HashMap<String, Vec<Vec<Record>>>,
        /// (topic, group) -> next offset per partition.
        committed: HashMap<(String, String), Vec<u64>>,
    }

    impl BrokerState {
        fn partitions_mut(&mut self, topic: &str, n: u32) -> &mut Vec<Vec<Record>> {
            self.logs
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); n as usize])
        }
    }

    struct Shared {
        state: Mutex<BrokerState>,
        partitions: u32,
        available: AtomicBool,
        /// Woken on every append.
        appended: Notify,
    }

    /// In-memory broker shared by producers and consumers.
    ///
    /// Cloning is cheap; clones share the same topics.
    #[derive(Clone)]
    pub struct MemoryBroker {
        shared: Arc<Shared>,
    }

    impl MemoryBroker {
        /// Create a broker with the default partition count.
        pub fn new() -> Self {
            Self::with_partitions(DEFAULT_PARTITIONS)
        }

        pub fn with_partitions(partitions: u32) -> Self {
            Self {
                shared: Arc::new(Shared {
                    state: Mutex::new(BrokerState::default()),
                    partitions: partitions.max(1),
                    available: AtomicBool::new(true),
                    appended: Notify::new(),
                }),
            }
        }

        /// Simulate an outage: publish and subscribe fail with `Unavailable`
        /// until re-enabled. Existing consumers keep working.
        pub fn set_available(&self, available: bool) {
            self.shared.available.store(available, Ordering::Release);
        }

        pub fn partitions(&self) -> u32 {
            self.shared.partitions
        }

        /// All records of a topic, partition by partition.
        pub async fn records(&self, topic: &str) -> Vec<Record> {
            let state = self.shared.state.lock().await;
            state
                .logs
                .get(topic)
                .map(|logs| logs.iter().flatten().cloned().collect())
                .unwrap_or_default()
        }

        /// Next offset the group will read from `partition`.
        pub async fn committed_offset(&self, topic: &str, group_id: &str, partition: u32) -> u64 {
            let state = self.shared.state.lock().await;
            state
                .committed
                .get(&(topic.to_string(), group_id.to_string()))
                .and_then(|offsets| offsets.get(partition as usize).copied())
                .unwrap_or(0)
        }

        fn check_available(&self) -> Result<()> {
            if self.shared.available.load(Ordering::Acquire) {
                Ok(())
            } else {
                Err(StreamError::Unavailable("memory broker offline".into()))
            }
        }
    }

    impl Default for MemoryBroker {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Broker for MemoryBroker {
        async fn publish(&self, topic: &str, key: &str, value: Bytes) -> Result<RecordMeta> {
            self.check_available()?;

            let partitions = self.shared.partitions;
            let partition = partition_for(key, partitions);
            let meta = {
                let mut state = self.shared.state.lock().await;
                let log = &mut state.partitions_mut(topic, partitions)[partition as usize];
                let offset = log.len() as u64;
                log.push(Record {
                    topic: topic.to_string(),
                    partition,
                    offset,
                    key: key.to_string(),
                    value,
                });
                RecordMeta {
                    topic: topic.to_string(),
                    partition,
                    offset,
                }
            };

            self.shared.appended.notify_waiters();
            Ok(meta)
        }

        async fn subscribe(&self, topic: &str, group_id: &str) -> Result<Box<dyn Consumer>> {
            self.check_available()?;

            let partitions = self.shared.partitions;
            let positions = {
                let mut state = self.shared.state.lock().await;
                state.partitions_mut(topic, partitions);
                state
                    .committed
                    .entry((topic.to_string(), group_id.to_string()))
                    .or_insert_with(|| vec![0; partitions as usize])
                    .clone()
            };

            Ok(Box::new(MemoryConsumer {
                shared: Arc::clone(&self.shared),
                topic: topic.to_string(),
                group_id: group_id.to_string(),
                positions,
                next_partition: 0,
                closed: false,
            }))
        }
    }

    /// In-memory consumer bound to one (topic, group).
    pub struct MemoryConsumer {
        shared: Arc<Shared>,
        topic: String,
        group_id: String,
        /// Next offset to deliver, per partition.
        positions: Vec<u64>,
        /// Round-robin cursor so one busy partition cannot starve the others.
        next_partition: usize,
        closed: bool,
    }

    impl MemoryConsumer {
        async fn next_ready(&mut self) -> Option<Record> {
            let state = self.shared.state.lock().await;
            let logs = state.logs.get(&self.topic)?;

            let n = self.positions.len();
            for step in 0..n {
                let partition = (self.next_partition + step) % n;
                let position = self.positions[partition] as usize;
                if let Some(record) = logs[partition].get(position) {
                    self.positions[partition] += 1;
                    self.next_partition = (partition + 1) % n;
                    return Some(record.clone());
                }
            }
            None
        }

        fn ensure_open(&self) -> Result<()> {
            if self.closed {
                return Err(StreamError::Closed);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Consumer for MemoryConsumer {
        async fn poll(&mut self, timeout: Duration) -> Result<Option<Record>> {
            self.ensure_open()?;
            let deadline = Instant::now() + timeout;

            loop {
                // Register before checking so an append in between is not missed.
                let shared = Arc::clone(&self.shared);
                let appended = shared.appended.notified();

                if let Some(record) = self.next_ready().await {
                    return Ok(Some(record));
                }

                let now = Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                if tokio::time::timeout(deadline - now, appended).await.is_err() {
                    return Ok(None);
                }
            }
        }

        async fn ack(&mut self, record: &Record) -> Result<()> {
            self.ensure_open()?;
            let mut state = self.shared.state.lock().await;
            let offsets = state
                .committed
                .entry((self.topic.clone(), self.group_id.clone()))
                .or_insert_with(|| vec![0; self.positions.len()]);

            let slot = offsets
                .get_mut(record.partition as usize)
                .ok_or_else(|| StreamError::Transport("unknown partition".into()))?;
            *slot = (*slot).max(record.offset + 1);
            Ok(())
        }

        async fn nack(&mut self, record: &Record) -> Result<()> {
            self.ensure_open()?;
            let position = self
                .positions
                .get_mut(record.partition as usize)
                .ok_or_else(|| StreamError::Transport("unknown partition".into()))?;
            *position = (*position).min(record.offset);
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryBroker;
    use super::*;
    use crate::error::StreamError;

    const POLL: Duration = Duration::from_millis(50);

    #[test]
    fn test_partition_stable() {
        assert_eq!(partition_for("a@x.com", 4), partition_for("a@x.com", 4));
        assert!(partition_for("b@x.com", 4) < 4);
        assert_eq!(partition_for("anything", 0), 0);
    }

    #[tokio::test]
    async fn test_publish_then_poll() {
        let broker = MemoryBroker::new();
        let mut consumer = broker.subscribe("credit-data", "g").await.unwrap();

        let meta = broker
            .publish("credit-data", "a@x.com", Bytes::from_static(b"one"))
            .await
            .unwrap();
        assert_eq!(meta.offset, 0);

        let record = consumer.poll(POLL).await.unwrap().unwrap();
        assert_eq!(record.value, Bytes::from_static(b"one"));
        assert_eq!(record.meta(), meta);

        assert!(consumer.poll(POLL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_poll_wakes_on_publish() {
        let broker = MemoryBroker::new();
        let mut consumer = broker.subscribe("t", "g").await.unwrap();

        let producer = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.publish("t", "k", Bytes::from_static(b"late")).await.unwrap();
        });

        let record = consumer.poll(Duration::from_secs(5)).await.unwrap();
        assert!(record.is_some());
    }

    #[tokio::test]
    async fn test_same_key_keeps_order() {
        let broker = MemoryBroker::new();
        for i in 0..5u8 {
            broker.publish("t", "a@x.com", Bytes::from(vec![i])).await.unwrap();
        }

        let mut consumer = broker.subscribe("t", "g").await.unwrap();
        for i in 0..5u8 {
            let record = consumer.poll(POLL).await.unwrap().unwrap();
            assert_eq!(record.value.as_ref(), &[i]);
            consumer.ack(&record).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_nack_redelivers() {
        let broker = MemoryBroker::new();
        broker.publish("t", "k", Bytes::from_static(b"x")).await.unwrap();

        let mut consumer = broker.subscribe("t", "g").await.unwrap();
        let first = consumer.poll(POLL).await.unwrap().unwrap();
        consumer.nack(&first).await.unwrap();

        let again = consumer.poll(POLL).await.unwrap().unwrap();
        assert_eq!(again, first);
    }

    #[tokio::test]
    async fn test_new_consumer_resumes_from_commit() {
        let broker = MemoryBroker::with_partitions(1);
        for v in [b"a", b"b", b"c"] {
            broker.publish("t", "k", Bytes::from_static(v)).await.unwrap();
        }

        let mut first = broker.subscribe("t", "g").await.unwrap();
        let a = first.poll(POLL).await.unwrap().unwrap();
        first.ack(&a).await.unwrap();
        // Delivered but never acked.
        let _b = first.poll(POLL).await.unwrap().unwrap();
        first.close().await.unwrap();

        let mut second = broker.subscribe("t", "g").await.unwrap();
        let next = second.poll(POLL).await.unwrap().unwrap();
        assert_eq!(next.value, Bytes::from_static(b"b"));
        assert_eq!(broker.committed_offset("t", "g", 0).await, 1);
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let broker = MemoryBroker::new();
        broker.publish("t", "k", Bytes::from_static(b"x")).await.unwrap();

        let mut g1 = broker.subscribe("t", "g1").await.unwrap();
        let mut g2 = broker.subscribe("t", "g2").await.unwrap();
        assert!(g1.poll(POLL).await.unwrap().is_some());
        assert!(g2.poll(POLL).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unavailable_and_closed() {
        let broker = MemoryBroker::new();
        let mut consumer = broker.subscribe("t", "g").await.unwrap();

        broker.set_available(false);
        let err = broker.publish("t", "k", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, StreamError::Unavailable(_)));
        assert!(broker.records("t").await.is_empty());
        broker.set_available(true);

        consumer.close().await.unwrap();
        assert!(matches!(consumer.poll(POLL).await, Err(StreamError::Closed)));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn partition_in_range_and_stable(key in "[a-z0-9@.]{1,32}", partitions in 1u32..64) {
                let p = partition_for(&key, partitions);
                prop_assert!(p < partitions);
                prop_assert_eq!(p, partition_for(&key, partitions));
            }
        }
    }
}
