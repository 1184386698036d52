//! LRU + TTL cache for AI decisions, keyed by risk-pattern fingerprint.
//!
//! The fingerprint hashes the policy-relevant tuple only - action, role,
//! score bucket, sorted factors, geo flag, sensitivity - and deliberately
//! excludes actor and session identity. The first AI verdict for a pattern
//! is therefore reused for every actor exhibiting that pattern within TTL.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::CacheConfig;
use crate::types::{DecisionResult, DecisionSource, RiskSignal};

// ============================================================================
// Fingerprint
// ============================================================================

/// 128-bit pattern fingerprint (md5 of the canonical pattern tuple).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 16]);

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Compute the pattern fingerprint for a signal.
///
/// The score enters as a one-decimal bucket so near-identical scores share
/// an entry; factors are sorted so tag order never splits a pattern.
pub fn compute_fingerprint(signal: &RiskSignal) -> Fingerprint {
    let mut factors: Vec<&str> = signal.risk_factors.iter().map(String::as_str).collect();
    factors.sort_unstable();
    let canonical = format!(
        "action={}|role={}|risk_bucket={:.1}|factors={}|geo_change={}|sensitivity={}",
        signal.original_event.action,
        signal.original_event.role,
        signal.risk_score,
        factors.join(","),
        signal.original_event.geo_change,
        signal.original_event.resource_sensitivity,
    );
    Fingerprint(md5::compute(canonical.as_bytes()).0)
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Debug, Clone)]
struct CacheEntry {
    result: DecisionResult,
    inserted_at: Instant,
    /// Access-order stamp; larger = more recently used.
    last_access: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<Fingerprint, CacheEntry>,
    access_seq: u64,
    hits: u64,
    misses: u64,
}

/// Decision cache shared across decision-engine workers.
///
/// Expiry is lazy: a lookup that finds a TTL-expired entry deletes it and
/// reports a miss, so no background sweeper is needed for correctness.
#[derive(Debug)]
pub struct DecisionCache {
    max_size: usize,
    ttl: Duration,
    inner: Mutex<CacheInner>,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub ttl_seconds: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate_percent: f64,
}

impl DecisionCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            max_size: config.max_size,
            ttl: Duration::from_secs(config.ttl_seconds),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Look up a pattern, promoting the entry to most-recently-used.
    ///
    /// Returns the stored verdict re-tagged `source = cache`; the caller
    /// rebinds `correlation_id` / `actor_id` / `latency_ms` to the live
    /// signal.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<DecisionResult> {
        let mut inner = self.lock_inner();
        let expired = match inner.entries.get(fingerprint) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) => entry.inserted_at.elapsed() > self.ttl,
        };
        if expired {
            inner.entries.remove(fingerprint);
            inner.misses += 1;
            return None;
        }
        inner.access_seq += 1;
        inner.hits += 1;
        let seq = inner.access_seq;
        let entry = inner.entries.get_mut(fingerprint)?;
        entry.last_access = seq;
        let mut result = entry.result.clone();
        result.source = DecisionSource::Cache;
        Some(result)
    }

    /// Store a verdict for a pattern, replacing in place on an existing key
    /// and evicting the least-recently-used entry when at capacity.
    pub fn put(&self, fingerprint: Fingerprint, result: DecisionResult) {
        if self.max_size == 0 {
            return;
        }
        let mut inner = self.lock_inner();
        inner.access_seq += 1;
        let seq = inner.access_seq;
        let replacing = inner.entries.contains_key(&fingerprint);
        if !replacing && inner.entries.len() >= self.max_size {
            if let Some(victim) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(fp, _)| *fp)
            {
                inner.entries.remove(&victim);
            }
        }
        inner.entries.insert(
            fingerprint,
            CacheEntry {
                result,
                inserted_at: Instant::now(),
                last_access: seq,
            },
        );
    }

    /// Drop every entry and reset hit/miss counters.
    pub fn clear(&self) {
        let mut inner = self.lock_inner();
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    /// Remove all expired entries; returns the number removed.
    /// Optional housekeeping - lazy expiry on access already keeps lookups
    /// correct.
    pub fn cleanup_expired(&self) -> usize {
        let mut inner = self.lock_inner();
        let before = inner.entries.len();
        let ttl = self.ttl;
        inner
            .entries
            .retain(|_, entry| entry.inserted_at.elapsed() <= ttl);
        before - inner.entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock_inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock_inner();
        let total = inner.hits + inner.misses;
        CacheStats {
            size: inner.entries.len(),
            max_size: self.max_size,
            ttl_seconds: self.ttl.as_secs(),
            hits: inner.hits,
            misses: inner.misses,
            hit_rate_percent: if total > 0 {
                (inner.hits as f64 / total as f64 * 1_000.0).round() / 10.0
            } else {
                0.0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActionEvent, Decision, Sensitivity};
    use uuid::Uuid;

    fn signal(actor: &str, action: &str, score: f64) -> RiskSignal {
        RiskSignal {
            actor_id: actor.to_string(),
            risk_score: score,
            risk_factors: vec!["geographic_anomaly".to_string()],
            original_event: ActionEvent {
                actor_id: actor.to_string(),
                action: action.to_string(),
                role: "analyst".to_string(),
                frequency_last_60s: 8,
                geo_change: true,
                timestamp: 1_700_000_000_000,
                session_id: Uuid::new_v4(),
                resource_sensitivity: Sensitivity::High,
            },
            processing_timestamp: 1_700_000_000_010,
            correlation_id: Uuid::new_v4(),
        }
    }

    fn result(actor: &str) -> DecisionResult {
        DecisionResult {
            decision: Decision::Throttle,
            confidence: 0.8,
            reason: "model verdict".to_string(),
            source: DecisionSource::Ai,
            latency_ms: 120.0,
            provisional: false,
            correlation_id: Uuid::new_v4(),
            actor_id: actor.to_string(),
        }
    }

    fn cache(max_size: usize, ttl_seconds: u64) -> DecisionCache {
        DecisionCache::new(CacheConfig {
            max_size,
            ttl_seconds,
        })
    }

    #[test]
    fn fingerprint_ignores_actor_identity() {
        let a = compute_fingerprint(&signal("alice", "config_change", 0.55));
        let b = compute_fingerprint(&signal("bob", "config_change", 0.55));
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_distinguishes_actions_and_buckets() {
        let base = compute_fingerprint(&signal("u", "config_change", 0.55));
        assert_ne!(base, compute_fingerprint(&signal("u", "data_delete", 0.55)));
        assert_ne!(base, compute_fingerprint(&signal("u", "config_change", 0.75)));
    }

    #[test]
    fn fingerprint_is_order_insensitive_over_factors() {
        let mut first = signal("u", "config_change", 0.5);
        first.risk_factors = vec!["b".to_string(), "a".to_string()];
        let mut second = signal("u", "config_change", 0.5);
        second.risk_factors = vec!["a".to_string(), "b".to_string()];
        assert_eq!(compute_fingerprint(&first), compute_fingerprint(&second));
    }

    #[test]
    fn hit_returns_stored_verdict_tagged_cache() {
        let cache = cache(10, 300);
        let fp = compute_fingerprint(&signal("u", "config_change", 0.5));
        cache.put(fp, result("alice"));
        let hit = cache.get(&fp).unwrap();
        assert_eq!(hit.decision, Decision::Throttle);
        assert_eq!(hit.confidence, 0.8);
        assert_eq!(hit.source, DecisionSource::Cache);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn expired_entry_is_deleted_and_reported_as_miss() {
        let cache = cache(10, 0);
        let fp = compute_fingerprint(&signal("u", "config_change", 0.5));
        cache.put(fp, result("u"));
        assert!(cache.get(&fp).is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn capacity_is_never_exceeded_and_lru_is_evicted() {
        let cache = cache(2, 300);
        let fp1 = compute_fingerprint(&signal("u", "a1", 0.5));
        let fp2 = compute_fingerprint(&signal("u", "a2", 0.5));
        let fp3 = compute_fingerprint(&signal("u", "a3", 0.5));
        cache.put(fp1, result("u"));
        cache.put(fp2, result("u"));
        // Touch fp1 so fp2 becomes the LRU victim.
        assert!(cache.get(&fp1).is_some());
        cache.put(fp3, result("u"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&fp1).is_some());
        assert!(cache.get(&fp2).is_none());
        assert!(cache.get(&fp3).is_some());
    }

    #[test]
    fn put_on_existing_key_replaces_in_place() {
        let cache = cache(2, 300);
        let fp = compute_fingerprint(&signal("u", "a1", 0.5));
        cache.put(fp, result("u"));
        let mut updated = result("u");
        updated.decision = Decision::Block;
        cache.put(fp, updated);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&fp).unwrap().decision, Decision::Block);
    }

    #[test]
    fn cleanup_expired_reports_removals() {
        let cache = cache(10, 0);
        cache.put(compute_fingerprint(&signal("u", "a1", 0.5)), result("u"));
        cache.put(compute_fingerprint(&signal("u", "a2", 0.5)), result("u"));
        assert_eq!(cache.cleanup_expired(), 2);
        assert!(cache.is_empty());
    }
}
