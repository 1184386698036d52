//! Bounded-concurrency dispatcher for model calls.
//!
//! Bridges the per-record stage loop to a rate-limited remote model:
//! - at most `max_concurrent` calls in flight (counting semaphore)
//! - logical depth (in-flight + waiting) capped at `max_queue`; overflow
//!   returns the caller's fallback synchronously
//! - exponential backoff after rate-limit-shaped failures, reset on any
//!   success
//! - every suspension point (backoff sleep, semaphore wait) observes the
//!   pipeline cancellation token and resolves to the fallback promptly on
//!   shutdown; an already-running model call is never aborted mid-request.

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::AiConfig;
use crate::llm::BackendError;
use crate::types::DecisionResult;

/// Shared dispatcher for model calls. All methods take `&self`; clone the
/// surrounding `Arc` to share across decision-engine workers.
pub struct AiQueue {
    max_concurrent: usize,
    max_queue: usize,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    semaphore: Arc<Semaphore>,
    /// Logical queue depth: submissions past the overflow gate that have not
    /// yet produced a result.
    depth: AtomicUsize,
    /// Current backoff in milliseconds; 0 = healthy.
    backoff_ms: AtomicU64,
    cancel: CancellationToken,

    submitted: AtomicU64,
    completed: AtomicU64,
    overflowed: AtomicU64,
    rate_limited: AtomicU64,
}

/// Point-in-time queue statistics.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub max_concurrent: usize,
    pub max_queue: usize,
    pub queue_depth: usize,
    pub in_flight: usize,
    pub submitted: u64,
    pub completed: u64,
    pub overflowed: u64,
    pub rate_limited: u64,
    pub current_backoff_ms: u64,
}

impl AiQueue {
    pub fn new(config: &AiConfig, cancel: CancellationToken) -> Self {
        Self {
            max_concurrent: config.max_concurrent,
            max_queue: config.max_queue,
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            depth: AtomicUsize::new(0),
            backoff_ms: AtomicU64::new(0),
            cancel,
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            overflowed: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
        }
    }

    /// Submit one model call.
    ///
    /// `call` performs the request; `fallback` produces the rule-derived
    /// result used on overflow, cancellation, or backend failure. Returns
    /// whichever result won.
    pub async fn submit<C, Fut, F>(&self, call: C, fallback: F) -> DecisionResult
    where
        C: FnOnce() -> Fut,
        Fut: Future<Output = Result<DecisionResult, BackendError>>,
        F: FnOnce() -> DecisionResult,
    {
        self.submitted.fetch_add(1, Ordering::Relaxed);

        // Overflow gate: reserve a depth slot or bail out synchronously.
        if self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |depth| {
                (depth < self.max_queue).then_some(depth + 1)
            })
            .is_err()
        {
            self.overflowed.fetch_add(1, Ordering::Relaxed);
            warn!(
                max_queue = self.max_queue,
                "AI queue overflow, using fallback"
            );
            return fallback();
        }
        let _depth_slot = DepthSlot(&self.depth);

        // Honor the current backoff before competing for a permit.
        let backoff = self.backoff_ms.load(Ordering::SeqCst);
        if backoff > 0 {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("Shutdown during backoff sleep, using fallback");
                    return fallback();
                }
                _ = tokio::time::sleep(Duration::from_millis(backoff)) => {}
            }
        }

        let permit = tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!("Shutdown while waiting for AI slot, using fallback");
                return fallback();
            }
            permit = self.semaphore.acquire() => permit,
        };
        let Ok(_permit) = permit else {
            // Semaphore closed: only happens on teardown.
            return fallback();
        };

        match call().await {
            Ok(result) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                self.backoff_ms.store(0, Ordering::SeqCst);
                result
            }
            Err(e) => {
                if e.is_rate_limit_shaped() {
                    self.rate_limited.fetch_add(1, Ordering::Relaxed);
                    let now = self.advance_backoff();
                    warn!(backoff_ms = now, error = %e, "Model rate limited, backoff advanced");
                } else {
                    warn!(error = %e, "Model call failed, using fallback");
                }
                fallback()
            }
        }
    }

    /// Advance the exponential backoff and return the new value.
    fn advance_backoff(&self) -> u64 {
        let previous = self
            .backoff_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(if current == 0 {
                    self.initial_backoff_ms
                } else {
                    (current * 2).min(self.max_backoff_ms)
                })
            })
            .unwrap_or_else(|stale| stale);
        if previous == 0 {
            self.initial_backoff_ms
        } else {
            (previous * 2).min(self.max_backoff_ms)
        }
    }

    /// Current backoff in milliseconds (0 when healthy).
    pub fn current_backoff_ms(&self) -> u64 {
        self.backoff_ms.load(Ordering::SeqCst)
    }

    /// Requests currently executing against the backend.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.semaphore.available_permits()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            max_concurrent: self.max_concurrent,
            max_queue: self.max_queue,
            queue_depth: self.depth.load(Ordering::SeqCst),
            in_flight: self.in_flight(),
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            current_backoff_ms: self.current_backoff_ms(),
        }
    }
}

/// Releases one logical depth slot on drop, on every exit path.
struct DepthSlot<'a>(&'a AtomicUsize);

impl Drop for DepthSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
