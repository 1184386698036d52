//! Hybrid decision engine - Stage B of the gatekeeper pipeline.
//!
//! Routes each risk signal through one of three paths:
//! - fast rules for clear-cut scores (and for everything in FAST mode)
//! - the pattern-fingerprint cache for previously settled ambiguous cases
//! - the AI queue for fresh ambiguous cases, with rule fallback on
//!   overflow, backend failure, or shutdown
//!
//! The engine owns no shared mutable state beyond its mode selector; the
//! cache, queue, and backend are separately-owned, internally synchronised
//! components passed in by handle.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::debug;

use super::ai_queue::{AiQueue, QueueStats};
use super::decision_cache::{compute_fingerprint, CacheStats, DecisionCache};
use crate::bus::BusRecord;
use crate::config::defaults::LATENCY_WINDOW;
use crate::config::EngineConfig;
use crate::llm::{parse_response, RiskBackend};
use crate::pipeline::{StageError, StageHandler};
use crate::types::{
    now_ms, Decision, DecisionMode, DecisionResult, DecisionSource, RiskSignal,
};

// ============================================================================
// Latency Tracking
// ============================================================================

/// Moving-average latency windows, one per decision source.
#[derive(Debug, Default)]
struct LatencyWindows {
    rule: VecDeque<f64>,
    cache: VecDeque<f64>,
    ai: VecDeque<f64>,
}

impl LatencyWindows {
    fn record(&mut self, source: DecisionSource, latency_ms: f64) {
        let window = match source {
            DecisionSource::Rule => &mut self.rule,
            DecisionSource::Cache => &mut self.cache,
            DecisionSource::Ai => &mut self.ai,
        };
        if window.len() >= LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(latency_ms);
    }

    fn average(window: &VecDeque<f64>) -> f64 {
        if window.is_empty() {
            0.0
        } else {
            window.iter().sum::<f64>() / window.len() as f64
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Hybrid decision engine shared across decision-stage workers.
pub struct DecisionEngine {
    low_threshold: f64,
    high_threshold: f64,
    provisional_fallbacks: bool,
    /// Hot-swappable mode; readers never block a mode switch.
    mode: ArcSwap<DecisionMode>,
    cache: Arc<DecisionCache>,
    queue: Arc<AiQueue>,
    backend: Option<Arc<dyn RiskBackend>>,

    rule_decisions: AtomicU64,
    ai_decisions: AtomicU64,
    ai_failures: AtomicU64,
    decisions_made: AtomicU64,
    latencies: Mutex<LatencyWindows>,
}

/// Point-in-time engine statistics, including the shared cache and queue.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub mode: DecisionMode,
    pub rule_decisions: u64,
    pub ai_decisions: u64,
    pub ai_failures: u64,
    pub decisions_made: u64,
    pub avg_rule_latency_ms: f64,
    pub avg_cache_latency_ms: f64,
    pub avg_ai_latency_ms: f64,
    pub cache: CacheStats,
    pub queue: QueueStats,
}

impl DecisionEngine {
    pub fn new(
        config: EngineConfig,
        cache: Arc<DecisionCache>,
        queue: Arc<AiQueue>,
        backend: Option<Arc<dyn RiskBackend>>,
    ) -> Self {
        Self {
            low_threshold: config.low_threshold,
            high_threshold: config.high_threshold,
            provisional_fallbacks: config.provisional_fallbacks,
            mode: ArcSwap::from_pointee(config.mode),
            cache,
            queue,
            backend,
            rule_decisions: AtomicU64::new(0),
            ai_decisions: AtomicU64::new(0),
            ai_failures: AtomicU64::new(0),
            decisions_made: AtomicU64::new(0),
            latencies: Mutex::new(LatencyWindows::default()),
        }
    }

    /// Current operating mode.
    pub fn mode(&self) -> DecisionMode {
        **self.mode.load()
    }

    /// Switch modes at runtime.
    pub fn set_mode(&self, mode: DecisionMode) {
        self.mode.store(Arc::new(mode));
        tracing::info!(%mode, "Decision mode set");
    }

    /// Decide one risk signal.
    pub async fn decide(&self, signal: &RiskSignal) -> DecisionResult {
        let start = Instant::now();
        let mode = self.mode();

        // FAST mode and the clear-cut bands never leave the rule table.
        if mode == DecisionMode::Fast {
            return self.rule_decision(signal, start, None, false);
        }
        if signal.risk_score < self.low_threshold {
            return self.rule_decision(signal, start, Some(Decision::Allow), false);
        }
        if signal.risk_score > self.high_threshold {
            return self.rule_decision(signal, start, Some(Decision::Block), false);
        }

        // Ambiguous band: cache first (both HYBRID and FULL_AI - the mode
        // changes what gets cached upstream, not whether a settled pattern
        // is reused).
        let fingerprint = compute_fingerprint(signal);
        if let Some(mut cached) = self.cache.get(&fingerprint) {
            cached.correlation_id = signal.correlation_id;
            cached.actor_id = signal.actor_id.clone();
            cached.latency_ms = elapsed_ms(start);
            cached.provisional = false;
            self.decisions_made.fetch_add(1, Ordering::Relaxed);
            self.record_latency(DecisionSource::Cache, cached.latency_ms);
            debug!(
                actor_id = %signal.actor_id,
                fingerprint = %fingerprint,
                "Reusing cached decision"
            );
            return cached;
        }

        // Cache miss: consult the model through the bounded queue.
        let Some(backend) = self.backend.clone() else {
            self.ai_failures.fetch_add(1, Ordering::Relaxed);
            return self.rule_decision(signal, start, None, true);
        };

        let result = self
            .queue
            .submit(
                || async {
                    let text = backend.assess(signal).await?;
                    let verdict = parse_response(&text, signal);
                    let result = DecisionResult {
                        decision: verdict.decision,
                        confidence: verdict.confidence,
                        reason: verdict.reason,
                        source: DecisionSource::Ai,
                        latency_ms: 0.0,
                        provisional: false,
                        correlation_id: signal.correlation_id,
                        actor_id: signal.actor_id.clone(),
                    };
                    // A safe-default verdict must not poison the cache.
                    if !verdict.parse_fallback {
                        self.cache.put(fingerprint, result.clone());
                    }
                    self.ai_decisions.fetch_add(1, Ordering::Relaxed);
                    Ok(result)
                },
                || {
                    self.ai_failures.fetch_add(1, Ordering::Relaxed);
                    self.build_rule_decision(signal, None, self.provisional_fallbacks)
                },
            )
            .await;

        let mut result = result;
        result.latency_ms = elapsed_ms(start);
        self.decisions_made.fetch_add(1, Ordering::Relaxed);
        self.record_latency(result.source, result.latency_ms);
        result
    }

    /// Rule-table decision, measured and counted.
    fn rule_decision(
        &self,
        signal: &RiskSignal,
        start: Instant,
        forced: Option<Decision>,
        ai_path_fallback: bool,
    ) -> DecisionResult {
        let provisional = ai_path_fallback && self.provisional_fallbacks;
        let mut result = self.build_rule_decision(signal, forced, provisional);
        result.latency_ms = elapsed_ms(start);
        self.decisions_made.fetch_add(1, Ordering::Relaxed);
        self.record_latency(DecisionSource::Rule, result.latency_ms);
        result
    }

    /// The rule-decision table: band -> (decision, confidence), with the
    /// numeric band recorded in the reason for auditability.
    fn build_rule_decision(
        &self,
        signal: &RiskSignal,
        forced: Option<Decision>,
        provisional: bool,
    ) -> DecisionResult {
        let score = signal.risk_score;
        let (decision, confidence) = match forced {
            Some(decision @ (Decision::Allow | Decision::Block)) => (decision, 0.9),
            Some(decision) => (decision, 0.7),
            None => {
                if score < self.low_threshold {
                    (Decision::Allow, 0.9)
                } else if score > self.high_threshold {
                    (Decision::Block, 0.9)
                } else if score >= 0.5 {
                    (Decision::Throttle, 0.7)
                } else {
                    (Decision::Allow, 0.7)
                }
            }
        };

        let percent = score * 100.0;
        let reason = match decision {
            Decision::Allow => format!("Low risk ({percent:.0}%) - auto-approved by rules"),
            Decision::Block => format!("High risk ({percent:.0}%) - auto-blocked by rules"),
            Decision::Throttle => format!("Medium risk ({percent:.0}%) - rate limited by rules"),
            Decision::Escalate => format!("Risk score {percent:.0}% - rule-based decision"),
        };

        self.rule_decisions.fetch_add(1, Ordering::Relaxed);

        DecisionResult {
            decision,
            confidence,
            reason,
            source: DecisionSource::Rule,
            latency_ms: 0.0,
            provisional,
            correlation_id: signal.correlation_id,
            actor_id: signal.actor_id.clone(),
        }
    }

    fn record_latency(&self, source: DecisionSource, latency_ms: f64) {
        let mut windows = match self.latencies.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        windows.record(source, latency_ms);
    }

    pub fn stats(&self) -> EngineStats {
        let windows = match self.latencies.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        EngineStats {
            mode: self.mode(),
            rule_decisions: self.rule_decisions.load(Ordering::Relaxed),
            ai_decisions: self.ai_decisions.load(Ordering::Relaxed),
            ai_failures: self.ai_failures.load(Ordering::Relaxed),
            decisions_made: self.decisions_made.load(Ordering::Relaxed),
            avg_rule_latency_ms: LatencyWindows::average(&windows.rule),
            avg_cache_latency_ms: LatencyWindows::average(&windows.cache),
            avg_ai_latency_ms: LatencyWindows::average(&windows.ai),
            cache: self.cache.stats(),
            queue: self.queue.stats(),
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1_000.0
}

// ============================================================================
// Stage Handler
// ============================================================================

/// Stage B handler: decode signal, decide, emit decision.
pub struct DecisionStage {
    engine: Arc<DecisionEngine>,
}

impl DecisionStage {
    pub fn new(engine: Arc<DecisionEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl StageHandler for DecisionStage {
    async fn handle(&mut self, record: &BusRecord) -> Result<Option<(String, Vec<u8>)>, StageError> {
        let signal: RiskSignal = serde_json::from_slice(&record.payload)
            .map_err(|e| StageError::Skip(e.to_string()))?;
        let result = self.engine.decide(&signal).await;
        let decision = result.into_risk_decision(now_ms());
        let payload = serde_json::to_vec(&decision)
            .map_err(|e| StageError::Fatal(anyhow::Error::new(e).context("decision encode")))?;
        Ok(Some((decision.actor_id, payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AiConfig, CacheConfig};
    use crate::llm::{BackendError, MockBackend};
    use crate::types::{ActionEvent, Sensitivity};
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    /// Backend that replays a fixed response (or error) for every call.
    struct ScriptedBackend(Result<String, fn() -> BackendError>);

    #[async_trait]
    impl RiskBackend for ScriptedBackend {
        async fn assess(&self, _signal: &RiskSignal) -> Result<String, BackendError> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(make) => Err(make()),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn signal(actor: &str, score: f64) -> RiskSignal {
        RiskSignal {
            actor_id: actor.to_string(),
            risk_score: score,
            risk_factors: vec!["sensitive_action_config_change".to_string()],
            original_event: ActionEvent {
                actor_id: actor.to_string(),
                action: "config_change".to_string(),
                role: "analyst".to_string(),
                frequency_last_60s: 12,
                geo_change: false,
                timestamp: 1_700_000_000_000,
                session_id: Uuid::new_v4(),
                resource_sensitivity: Sensitivity::High,
            },
            processing_timestamp: 1_700_000_000_010,
            correlation_id: Uuid::new_v4(),
        }
    }

    fn engine(
        mode: DecisionMode,
        backend: Option<Arc<dyn RiskBackend>>,
        provisional: bool,
    ) -> DecisionEngine {
        let cache = Arc::new(DecisionCache::new(CacheConfig::default()));
        let queue = Arc::new(AiQueue::new(
            &AiConfig::default(),
            CancellationToken::new(),
        ));
        DecisionEngine::new(
            EngineConfig {
                mode,
                provisional_fallbacks: provisional,
                ..EngineConfig::default()
            },
            cache,
            queue,
            backend,
        )
    }

    #[tokio::test]
    async fn fast_mode_uses_rules_for_everything() {
        let engine = engine(DecisionMode::Fast, Some(Arc::new(MockBackend)), false);
        let result = engine.decide(&signal("u1", 0.55)).await;
        assert_eq!(result.source, DecisionSource::Rule);
        assert_eq!(result.decision, Decision::Throttle);
        assert_eq!(engine.stats().ai_decisions, 0);
    }

    #[tokio::test]
    async fn clear_bands_short_circuit_to_rules() {
        let engine = engine(DecisionMode::Hybrid, Some(Arc::new(MockBackend)), false);

        let low = engine.decide(&signal("u1", 0.1)).await;
        assert_eq!(low.decision, Decision::Allow);
        assert_eq!(low.confidence, 0.9);
        assert!(low.reason.contains("10%"), "reason was {}", low.reason);

        let high = engine.decide(&signal("u1", 0.91)).await;
        assert_eq!(high.decision, Decision::Block);
        assert_eq!(high.confidence, 0.9);
        assert!(high.reason.contains("91%"), "reason was {}", high.reason);

        assert_eq!(engine.stats().ai_decisions, 0);
    }

    #[tokio::test]
    async fn ambiguous_band_hits_ai_then_cache() {
        let backend = Arc::new(ScriptedBackend(Ok(
            r#"{"decision": "throttle", "confidence": 0.85, "reason": "model says so"}"#.to_string(),
        )));
        let engine = engine(DecisionMode::Hybrid, Some(backend), false);

        let first = engine.decide(&signal("alice", 0.55)).await;
        assert_eq!(first.source, DecisionSource::Ai);
        assert_eq!(first.decision, Decision::Throttle);

        // Same pattern, different actor: served from cache with identity
        // rebound to the new signal.
        let second_signal = signal("bob", 0.55);
        let second = engine.decide(&second_signal).await;
        assert_eq!(second.source, DecisionSource::Cache);
        assert_eq!(second.decision, Decision::Throttle);
        assert_eq!(second.confidence, 0.85);
        assert_eq!(second.reason, "model says so");
        assert_eq!(second.correlation_id, second_signal.correlation_id);
        assert_eq!(second.actor_id, "bob");

        let stats = engine.stats();
        assert_eq!(stats.ai_decisions, 1);
        assert_eq!(stats.cache.hits, 1);
    }

    #[tokio::test]
    async fn parse_fallback_is_served_but_never_cached() {
        let backend = Arc::new(ScriptedBackend(Ok("hmm, hard to say".to_string())));
        let engine = engine(DecisionMode::Hybrid, Some(backend), false);

        let first = engine.decide(&signal("u1", 0.65)).await;
        assert_eq!(first.source, DecisionSource::Ai);
        assert_eq!(first.decision, Decision::Throttle);
        assert!(first.reason.contains("parsing failed"));

        // Second identical pattern must go back to the model, not the cache.
        let second = engine.decide(&signal("u1", 0.65)).await;
        assert_eq!(second.source, DecisionSource::Ai);
        assert_eq!(engine.stats().cache.hits, 0);
    }

    #[tokio::test]
    async fn backend_errors_fall_back_to_rules() {
        let backend = Arc::new(ScriptedBackend(Err(|| {
            BackendError::Other("connection reset".to_string())
        })));
        let engine = engine(DecisionMode::Hybrid, Some(backend), false);
        let result = engine.decide(&signal("u1", 0.55)).await;
        assert_eq!(result.source, DecisionSource::Rule);
        assert_eq!(result.decision, Decision::Throttle);
        assert!(!result.provisional);
        assert_eq!(engine.stats().ai_failures, 1);
    }

    #[tokio::test]
    async fn rate_limited_backend_advances_queue_backoff() {
        let backend = Arc::new(ScriptedBackend(Err(|| {
            BackendError::RateLimited("HTTP 429".to_string())
        })));
        let cache = Arc::new(DecisionCache::new(CacheConfig::default()));
        let queue = Arc::new(AiQueue::new(
            &AiConfig {
                initial_backoff_ms: 5,
                max_backoff_ms: 20,
                ..AiConfig::default()
            },
            CancellationToken::new(),
        ));
        let engine = DecisionEngine::new(
            EngineConfig::default(),
            cache,
            Arc::clone(&queue),
            Some(backend),
        );

        let result = engine.decide(&signal("u1", 0.55)).await;
        assert_eq!(result.source, DecisionSource::Rule);
        assert!(queue.current_backoff_ms() > 0);
        assert_eq!(queue.stats().rate_limited, 1);
    }

    #[tokio::test]
    async fn missing_backend_falls_back_and_can_mark_provisional() {
        let engine = engine(DecisionMode::Hybrid, None, true);
        let result = engine.decide(&signal("u1", 0.55)).await;
        assert_eq!(result.source, DecisionSource::Rule);
        assert!(result.provisional);

        let engine = self::engine(DecisionMode::Hybrid, None, false);
        let result = engine.decide(&signal("u1", 0.55)).await;
        assert!(!result.provisional);
    }

    #[tokio::test]
    async fn mode_can_be_switched_at_runtime() {
        let engine = engine(DecisionMode::Hybrid, Some(Arc::new(MockBackend)), false);
        assert_eq!(engine.mode(), DecisionMode::Hybrid);
        engine.set_mode(DecisionMode::Fast);
        assert_eq!(engine.mode(), DecisionMode::Fast);
        let result = engine.decide(&signal("u1", 0.55)).await;
        assert_eq!(result.source, DecisionSource::Rule);
    }
}
