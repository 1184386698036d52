//! Unified stage-worker loop shared by all three pipeline stages.
//!
//! Every stage is the same shape: poll a consumer with a timeout, decode the
//! record, run the stage function, optionally produce to the next topic
//! keyed by actor, and rely on auto-commit for offsets. This module owns
//! that shape once; the stages implement [`StageHandler`] with their own
//! decode/process/encode logic.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{BusConsumer, BusError, BusProducer, BusRecord, MessageBus, Polled};
use crate::config::defaults::PRODUCER_FLUSH_TIMEOUT_SECS;

/// Stage processing outcome for one record.
#[derive(Debug, Error)]
pub enum StageError {
    /// Malformed record: log, count, skip, and keep the partition moving.
    /// The offset stays committed so the record is not retried.
    #[error("skipping malformed record: {0}")]
    Skip(String),

    /// Unrecoverable failure: the stage worker exits.
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

/// One stage's domain logic.
#[async_trait]
pub trait StageHandler: Send {
    /// Process one record. `Ok(Some((key, payload)))` is produced to the
    /// stage's output topic; `Ok(None)` produces nothing (terminal stage or
    /// filtered record).
    async fn handle(&mut self, record: &BusRecord) -> Result<Option<(String, Vec<u8>)>, StageError>;
}

/// Per-worker bus-level counters, shared with the coordinator.
#[derive(Debug, Default)]
pub struct WorkerCounters {
    pub events_processed: AtomicU64,
    pub events_failed: AtomicU64,
}

/// Snapshot of [`WorkerCounters`].
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStats {
    pub events_processed: u64,
    pub events_failed: u64,
}

impl WorkerCounters {
    pub fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
        }
    }
}

/// A stage worker: one consumer, at most one producer, one handler.
pub struct StageWorker<H: StageHandler> {
    name: &'static str,
    bus: Arc<dyn MessageBus>,
    in_topic: String,
    group: String,
    out_topic: Option<String>,
    handler: H,
    consumer: Option<Box<dyn BusConsumer>>,
    producer: Option<Box<dyn BusProducer>>,
    cancel: CancellationToken,
    counters: Arc<WorkerCounters>,
}

impl<H: StageHandler> StageWorker<H> {
    pub fn new(
        name: &'static str,
        bus: Arc<dyn MessageBus>,
        in_topic: String,
        group: String,
        out_topic: Option<String>,
        handler: H,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name,
            bus,
            in_topic,
            group,
            out_topic,
            handler,
            consumer: None,
            producer: None,
            cancel,
            counters: Arc::new(WorkerCounters::default()),
        }
    }

    /// Shared counter handle for coordinator snapshots.
    pub fn counters(&self) -> Arc<WorkerCounters> {
        Arc::clone(&self.counters)
    }

    /// Token that stops this worker between poll iterations.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Subscribe the consumer and (if this stage produces) create the
    /// producer.
    pub fn connect(&mut self) -> Result<(), BusError> {
        self.consumer = Some(self.bus.consumer(&self.in_topic, &self.group)?);
        if self.out_topic.is_some() {
            self.producer = Some(self.bus.producer()?);
        }
        info!(
            stage = self.name,
            topic = %self.in_topic,
            group = %self.group,
            "Stage connected"
        );
        Ok(())
    }

    /// Flush pending produces (bounded) and drop the bus handles.
    pub async fn disconnect(&mut self) {
        if let Some(producer) = self.producer.take() {
            let timeout = Duration::from_secs(PRODUCER_FLUSH_TIMEOUT_SECS);
            if let Err(e) = producer.flush(timeout).await {
                warn!(stage = self.name, error = %e, "Producer flush failed on disconnect");
            }
        }
        self.consumer = None;
        info!(stage = self.name, "Stage disconnected");
    }

    /// Request the loop to stop at the next iteration boundary.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Run the stage loop until cancellation, end-of-stream, or `max_items`.
    ///
    /// Returns the number of records processed successfully.
    pub async fn run(
        &mut self,
        max_items: Option<u64>,
        poll_timeout: Duration,
    ) -> anyhow::Result<u64> {
        let consumer = self
            .consumer
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("{} run() before connect()", self.name))?;
        let mut processed = 0u64;

        info!(stage = self.name, "Stage worker started");
        loop {
            if max_items.is_some_and(|max| processed >= max) {
                break;
            }

            let polled = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(stage = self.name, "Shutdown signal received");
                    break;
                }
                polled = consumer.poll(poll_timeout) => polled?,
            };

            let record = match polled {
                Polled::Record(record) => record,
                // Caught-up / partition-EOF polls spin quietly.
                Polled::Idle => continue,
                Polled::Eof => {
                    info!(
                        stage = self.name,
                        processed, "Input stream ended, stage draining complete"
                    );
                    break;
                }
            };

            match self.handler.handle(&record).await {
                Ok(output) => {
                    if let (Some((key, payload)), Some(topic)) = (output, &self.out_topic) {
                        let producer = self
                            .producer
                            .as_ref()
                            .ok_or_else(|| anyhow::anyhow!("{} producing without producer", self.name))?;
                        producer.send(topic, &key, payload).await?;
                    }
                    processed += 1;
                    self.counters.events_processed.fetch_add(1, Ordering::Relaxed);
                }
                Err(StageError::Skip(reason)) => {
                    // Offset is already auto-committed; the bad record will
                    // not be retried.
                    self.counters.events_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        stage = self.name,
                        partition = record.partition,
                        offset = record.offset,
                        %reason,
                        "Skipping malformed record"
                    );
                }
                Err(StageError::Fatal(e)) => {
                    self.counters.events_failed.fetch_add(1, Ordering::Relaxed);
                    return Err(e.context(format!("{} stage failure", self.name)));
                }
            }
        }

        debug!(stage = self.name, processed, "Stage worker stopped");
        Ok(processed)
    }
}
