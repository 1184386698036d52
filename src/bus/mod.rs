//! Message bus abstraction for the pipeline stages.
//!
//! The production deployment fronts a durable partitioned log (external to
//! this crate); stages only ever talk to the [`BusConsumer`] / [`BusProducer`]
//! traits, so the transport can be swapped without touching stage code. The
//! in-memory implementation in [`memory`] preserves the two properties the
//! pipeline relies on: keyed partitioning (all records with one key land on
//! one partition) and in-order delivery within a partition.

pub mod codec;
pub mod memory;

pub use codec::{CodecError, EventCodec};
pub use memory::InMemoryBus;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Bus transport errors.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("unknown topic '{0}'")]
    UnknownTopic(String),

    #[error("bus handle used before connect")]
    NotConnected,

    #[error("bus is closed")]
    Closed,

    #[error("produce to '{topic}' failed: {message}")]
    Produce { topic: String, message: String },
}

/// A single record as delivered to a consumer.
#[derive(Debug, Clone)]
pub struct BusRecord {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    /// Partition key (always `actor_id` in this pipeline).
    pub key: String,
    pub payload: Vec<u8>,
    /// Broker-side append time, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Outcome of a single consumer poll.
#[derive(Debug)]
pub enum Polled {
    /// A record was delivered.
    Record(BusRecord),
    /// Poll timeout expired with nothing to deliver. Not an error; stage
    /// loops spin quietly on this.
    Idle,
    /// The bus has been closed and every assigned partition is drained.
    Eof,
}

/// Consuming side of a topic subscription within a consumer group.
///
/// Offsets advance automatically on poll (auto-commit, at-least-once);
/// [`commit`](BusConsumer::commit) exists so a manual-commit adapter against
/// a durable bus can slot in without changing stage code.
#[async_trait]
pub trait BusConsumer: Send {
    /// Deliver the next record, waiting up to `timeout`.
    async fn poll(&mut self, timeout: Duration) -> Result<Polled, BusError>;

    /// Commit consumed offsets. No-op under auto-commit.
    async fn commit(&mut self) -> Result<(), BusError>;
}

/// Producing side of the bus.
#[async_trait]
pub trait BusProducer: Send + Sync {
    /// Append a record to `topic`, partitioned by `key`.
    async fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Flush any buffered records, waiting at most `timeout`.
    async fn flush(&self, timeout: Duration) -> Result<(), BusError>;
}

/// Factory for consumers and producers against one bus deployment.
pub trait MessageBus: Send + Sync {
    /// Subscribe to `topic` as a member of `group`.
    fn consumer(&self, topic: &str, group: &str) -> Result<Box<dyn BusConsumer>, BusError>;

    /// Create a producer handle.
    fn producer(&self) -> Result<Box<dyn BusProducer>, BusError>;
}
