//! Real-time per-actor event-rate tracking with bucketed sliding windows.
//!
//! Exact per-event timestamp lists grow without bound under a bursty
//! attacker; fixed-width buckets cap memory at
//! `active_actors x (window / bucket_width)` counters and cost at most one
//! bucket width of temporal imprecision, which is acceptable because the
//! downstream thresholds are coarse per-minute bands.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::config::FrequencyConfig;
use crate::types::now_ms;

/// Sliding-window event counter, shared across stage workers.
///
/// All methods take `&self`; the window map is internally synchronised.
/// Construct once at pipeline startup and hand an `Arc` to each signal
/// processor instance.
#[derive(Debug)]
pub struct FrequencyTracker {
    window_secs: i64,
    bucket_secs: i64,
    /// actor_id -> bucket start (seconds) -> count
    windows: Mutex<HashMap<String, BTreeMap<i64, u64>>>,
    total_events: AtomicU64,
}

/// Point-in-time tracker statistics.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerStats {
    pub active_actors: usize,
    pub total_events_in_window: u64,
    pub max_frequency: u64,
    pub total_events_processed: u64,
}

impl FrequencyTracker {
    pub fn new(config: FrequencyConfig) -> Self {
        Self {
            window_secs: config.window_seconds.max(1) as i64,
            bucket_secs: config.bucket_seconds.max(1) as i64,
            windows: Mutex::new(HashMap::new()),
            total_events: AtomicU64::new(0),
        }
    }

    fn bucket_key(&self, ts_secs: i64) -> i64 {
        ts_secs.div_euclid(self.bucket_secs) * self.bucket_secs
    }

    fn lock_windows(&self) -> std::sync::MutexGuard<'_, HashMap<String, BTreeMap<i64, u64>>> {
        match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record one event for `actor_id` at `timestamp_ms` and return the
    /// actor's live count over the trailing window.
    pub fn record(&self, actor_id: &str, timestamp_ms: i64) -> u64 {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        let ts_secs = timestamp_ms.div_euclid(1_000);
        let bucket = self.bucket_key(ts_secs);
        let cutoff = ts_secs - self.window_secs;

        let mut windows = self.lock_windows();
        let actor = windows.entry(actor_id.to_string()).or_default();
        *actor.entry(bucket).or_insert(0) += 1;
        // Evict buckets that fell out of the window.
        *actor = actor.split_off(&cutoff);
        actor.values().sum()
    }

    /// Read-only count for `actor_id` over the window ending now.
    pub fn get(&self, actor_id: &str) -> u64 {
        self.get_at(actor_id, now_ms())
    }

    /// Read-only count over the window ending at `now_ms` (for tests and
    /// replay tooling).
    pub fn get_at(&self, actor_id: &str, now_ms: i64) -> u64 {
        let cutoff = now_ms.div_euclid(1_000) - self.window_secs;
        let windows = self.lock_windows();
        windows
            .get(actor_id)
            .map(|actor| {
                actor
                    .range(cutoff..)
                    .map(|(_, count)| count)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Live counts for every actor with a non-zero window, pruning actors
    /// whose windows emptied.
    pub fn snapshot(&self) -> HashMap<String, u64> {
        let cutoff = now_ms().div_euclid(1_000) - self.window_secs;
        let mut windows = self.lock_windows();
        let mut result = HashMap::new();
        windows.retain(|actor_id, actor| {
            *actor = actor.split_off(&cutoff);
            let count: u64 = actor.values().sum();
            if count > 0 {
                result.insert(actor_id.clone(), count);
                true
            } else {
                false
            }
        });
        result
    }

    pub fn stats(&self) -> TrackerStats {
        let frequencies = self.snapshot();
        TrackerStats {
            active_actors: frequencies.len(),
            total_events_in_window: frequencies.values().sum(),
            max_frequency: frequencies.values().copied().max().unwrap_or(0),
            total_events_processed: self.total_events.load(Ordering::Relaxed),
        }
    }
}
