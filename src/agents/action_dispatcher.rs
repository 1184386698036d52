//! Action dispatch - Stage C of the gatekeeper pipeline.
//!
//! Consumes published decisions and executes the response: audit records
//! for every outcome, per-actor rate limiting on throttle verdicts, and
//! decision counters. In production the block path calls out to an access
//! control system; the core guarantees the audit trail.
//!
//! Audit records are tracing events with `target: "audit"` so deployments
//! can route them to a dedicated sink via the subscriber's filter.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::bus::BusRecord;
use crate::config::RateLimitConfig;
use crate::pipeline::{StageError, StageHandler};
use crate::types::{now_ms, Decision, RiskDecision};

// ============================================================================
// Rate Limiter
// ============================================================================

/// Per-actor sliding-window rate limiter for throttle outcomes.
///
/// Keeps one timestamp list per actor, evicted down to the window on every
/// consultation, so memory stays bounded by
/// `active_actors x max_requests` entries.
#[derive(Debug)]
pub struct RateLimiter {
    window_ms: i64,
    max_requests: usize,
    requests: Mutex<HashMap<String, Vec<i64>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            window_ms: (config.window_seconds.max(1) as i64) * 1_000,
            max_requests: config.max_requests as usize,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `actor_id` still has a token in the current window. Consumes
    /// a token when allowed.
    pub fn is_allowed(&self, actor_id: &str) -> bool {
        self.is_allowed_at(actor_id, now_ms())
    }

    /// Deterministic-time variant for tests and replay tooling.
    pub fn is_allowed_at(&self, actor_id: &str, now_ms: i64) -> bool {
        let cutoff = now_ms - self.window_ms;
        let mut requests = match self.requests.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let timestamps = requests.entry(actor_id.to_string()).or_default();
        timestamps.retain(|&ts| ts > cutoff);
        if timestamps.len() >= self.max_requests {
            return false;
        }
        timestamps.push(now_ms);
        true
    }

    /// Actors currently holding at least one live timestamp.
    pub fn tracked_actors(&self) -> usize {
        match self.requests.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Decision counters, shared with the coordinator.
#[derive(Debug, Default)]
pub struct DispatchCounters {
    pub actions_executed: AtomicU64,
    pub allows: AtomicU64,
    pub throttles: AtomicU64,
    pub blocks: AtomicU64,
    pub escalations: AtomicU64,
    pub rate_limited: AtomicU64,
}

/// Snapshot of [`DispatchCounters`].
#[derive(Debug, Clone, Serialize)]
pub struct DispatchStats {
    pub actions_executed: u64,
    pub allows: u64,
    pub throttles: u64,
    pub blocks: u64,
    pub escalations: u64,
    pub rate_limited: u64,
}

impl DispatchCounters {
    pub fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            actions_executed: self.actions_executed.load(Ordering::Relaxed),
            allows: self.allows.load(Ordering::Relaxed),
            throttles: self.throttles.load(Ordering::Relaxed),
            blocks: self.blocks.load(Ordering::Relaxed),
            escalations: self.escalations.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
        }
    }
}

/// Stage C handler: decode decision, execute response, emit audit.
pub struct ActionDispatcher {
    rate_limiter: RateLimiter,
    counters: Arc<DispatchCounters>,
}

impl ActionDispatcher {
    pub fn new(rate_limit: RateLimitConfig) -> Self {
        Self {
            rate_limiter: RateLimiter::new(rate_limit),
            counters: Arc::new(DispatchCounters::default()),
        }
    }

    /// Shared counter handle for coordinator snapshots.
    pub fn counters(&self) -> Arc<DispatchCounters> {
        Arc::clone(&self.counters)
    }

    /// Execute the response for one decision.
    ///
    /// Verdicts outside the known set were already coerced to `escalate` at
    /// decode time, so every record lands in one of the four arms.
    pub fn execute(&self, decision: &RiskDecision) {
        match decision.decision {
            Decision::Allow => {
                self.counters.allows.fetch_add(1, Ordering::Relaxed);
                info!(
                    target: "audit",
                    actor_id = %decision.actor_id,
                    correlation_id = %decision.correlation_id,
                    confidence = decision.confidence,
                    "ALLOWED"
                );
            }
            Decision::Throttle => {
                self.counters.throttles.fetch_add(1, Ordering::Relaxed);
                let within_limit = self.rate_limiter.is_allowed(&decision.actor_id);
                if !within_limit {
                    self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
                }
                info!(
                    target: "audit",
                    actor_id = %decision.actor_id,
                    correlation_id = %decision.correlation_id,
                    status = if within_limit { "allowed (within limit)" } else { "rate limited" },
                    reason = %decision.reason,
                    "THROTTLE"
                );
            }
            Decision::Block => {
                self.counters.blocks.fetch_add(1, Ordering::Relaxed);
                // In production: call out to the access control system here.
                warn!(
                    target: "audit",
                    actor_id = %decision.actor_id,
                    correlation_id = %decision.correlation_id,
                    confidence = decision.confidence,
                    reason = %decision.reason,
                    "BLOCKED"
                );
            }
            Decision::Escalate => {
                self.counters.escalations.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target: "audit",
                    actor_id = %decision.actor_id,
                    correlation_id = %decision.correlation_id,
                    reason = %decision.reason,
                    "ESCALATED - requires human review"
                );
            }
        }
        self.counters.actions_executed.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl StageHandler for ActionDispatcher {
    async fn handle(&mut self, record: &BusRecord) -> Result<Option<(String, Vec<u8>)>, StageError> {
        let decision: RiskDecision = serde_json::from_slice(&record.payload)
            .map_err(|e| StageError::Skip(e.to_string()))?;
        self.execute(&decision);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn limiter(window_seconds: u64, max_requests: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            window_seconds,
            max_requests,
        })
    }

    fn decision(actor: &str, verdict: Decision) -> RiskDecision {
        RiskDecision {
            actor_id: actor.to_string(),
            decision: verdict,
            confidence: 0.7,
            reason: "test".to_string(),
            correlation_id: Uuid::new_v4(),
            decision_timestamp: now_ms(),
        }
    }

    #[test]
    fn allows_up_to_capacity_then_limits() {
        let limiter = limiter(60, 5);
        let base = 1_700_000_000_000;
        for i in 0..5 {
            assert!(limiter.is_allowed_at("a", base + i), "token {i} should fit");
        }
        assert!(!limiter.is_allowed_at("a", base + 10));
    }

    #[test]
    fn window_eviction_frees_tokens() {
        let limiter = limiter(60, 2);
        let base = 1_700_000_000_000;
        assert!(limiter.is_allowed_at("a", base));
        assert!(limiter.is_allowed_at("a", base + 1));
        assert!(!limiter.is_allowed_at("a", base + 2));
        // 61 seconds on, the first two tokens have aged out.
        assert!(limiter.is_allowed_at("a", base + 61_000));
    }

    #[test]
    fn actors_have_independent_budgets() {
        let limiter = limiter(60, 1);
        let base = 1_700_000_000_000;
        assert!(limiter.is_allowed_at("a", base));
        assert!(limiter.is_allowed_at("b", base));
        assert!(!limiter.is_allowed_at("a", base + 1));
    }

    #[test]
    fn execute_counts_each_outcome() {
        let dispatcher = ActionDispatcher::new(RateLimitConfig::default());
        dispatcher.execute(&decision("u1", Decision::Allow));
        dispatcher.execute(&decision("u1", Decision::Block));
        dispatcher.execute(&decision("u1", Decision::Escalate));
        dispatcher.execute(&decision("u1", Decision::Throttle));
        let stats = dispatcher.counters().snapshot();
        assert_eq!(stats.allows, 1);
        assert_eq!(stats.blocks, 1);
        assert_eq!(stats.escalations, 1);
        assert_eq!(stats.throttles, 1);
        assert_eq!(stats.actions_executed, 4);
        assert_eq!(stats.rate_limited, 0);
    }

    #[test]
    fn throttle_burst_records_rate_limited() {
        let dispatcher = ActionDispatcher::new(RateLimitConfig {
            window_seconds: 60,
            max_requests: 5,
        });
        for _ in 0..20 {
            dispatcher.execute(&decision("u1", Decision::Throttle));
        }
        let stats = dispatcher.counters().snapshot();
        assert_eq!(stats.throttles, 20);
        assert_eq!(stats.rate_limited, 15);
    }

    #[test]
    fn unknown_wire_verdict_dispatches_as_escalate() {
        let raw = format!(
            r#"{{"actor_id":"u1","decision":"quarantine","confidence":0.5,
                "reason":"x","correlation_id":"{}","decision_timestamp":0}}"#,
            Uuid::new_v4()
        );
        let parsed: RiskDecision = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.decision, Decision::Escalate);
        let dispatcher = ActionDispatcher::new(RateLimitConfig::default());
        dispatcher.execute(&parsed);
        assert_eq!(dispatcher.counters().snapshot().escalations, 1);
    }
}
