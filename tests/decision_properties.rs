//! Property-based invariants for the scoring, tracking, caching, and
//! queueing components.

use proptest::prelude::*;
use std::sync::Arc;
use uuid::Uuid;

use riskgate::agents::{compute_fingerprint, AiQueue, DecisionCache, FrequencyTracker};
use riskgate::config::{AiConfig, CacheConfig, FrequencyConfig};
use riskgate::types::{
    ActionEvent, Decision, DecisionResult, DecisionSource, RiskSignal, Sensitivity,
};
use riskgate::RiskScoringConfig;

// ============================================================================
// Strategies
// ============================================================================

fn sensitivity_strategy() -> impl Strategy<Value = Sensitivity> {
    prop_oneof![
        Just(Sensitivity::Low),
        Just(Sensitivity::Medium),
        Just(Sensitivity::High),
        Just(Sensitivity::Critical),
        Just(Sensitivity::Unknown),
    ]
}

fn role_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("developer".to_string()),
        Just("analyst".to_string()),
        Just("support".to_string()),
        Just("admin".to_string()),
        Just("superuser".to_string()),
        Just("root".to_string()),
        "[a-z]{3,10}",
    ]
}

fn action_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("file_read".to_string()),
        Just("admin_access".to_string()),
        Just("config_change".to_string()),
        Just("data_delete".to_string()),
        Just("bulk_export".to_string()),
        "[a-z_]{3,12}",
    ]
}

prop_compose! {
    fn event_strategy()(
        actor in "[a-z0-9]{1,8}",
        action in action_strategy(),
        role in role_strategy(),
        frequency in 0u32..500,
        geo_change in any::<bool>(),
        sensitivity in sensitivity_strategy(),
    ) -> ActionEvent {
        ActionEvent {
            actor_id: actor,
            action,
            role,
            frequency_last_60s: frequency,
            geo_change,
            timestamp: 1_700_000_000_000,
            session_id: Uuid::from_u128(7),
            resource_sensitivity: sensitivity,
        }
    }
}

fn signal_for(event: ActionEvent, score: f64) -> RiskSignal {
    let scoring = RiskScoringConfig::default();
    let frequency = u64::from(event.frequency_last_60s);
    RiskSignal {
        actor_id: event.actor_id.clone(),
        risk_score: score,
        risk_factors: scoring.factors(&event, frequency),
        original_event: event,
        processing_timestamp: 1_700_000_000_010,
        correlation_id: Uuid::new_v4(),
    }
}

fn ai_result(marker: &str) -> DecisionResult {
    DecisionResult {
        decision: Decision::Throttle,
        confidence: 0.8,
        reason: marker.to_string(),
        source: DecisionSource::Ai,
        latency_ms: 42.0,
        provisional: false,
        correlation_id: Uuid::new_v4(),
        actor_id: "someone".to_string(),
    }
}

// ============================================================================
// Scoring
// ============================================================================

proptest! {
    /// Invariant 1: scores are always inside the unit interval.
    #[test]
    fn score_is_bounded(event in event_strategy(), frequency in 0u64..10_000) {
        let scoring = RiskScoringConfig::default();
        let score = scoring.score(&event, frequency);
        prop_assert!((0.0..=1.0).contains(&score), "score {score} out of range");
    }

    /// Invariant 2: geo change + critical resource + hostile frequency is
    /// never scored below the high-risk threshold.
    #[test]
    fn worst_case_combination_scores_high(mut event in event_strategy(), frequency in 21u64..10_000) {
        event.geo_change = true;
        event.resource_sensitivity = Sensitivity::Critical;
        let scoring = RiskScoringConfig::default();
        let score = scoring.score(&event, frequency);
        prop_assert!(score >= 0.8, "score {score} below high band");
    }

    /// Scoring is a pure function: identical inputs, identical outputs.
    #[test]
    fn score_is_deterministic(event in event_strategy(), frequency in 0u64..10_000) {
        let scoring = RiskScoringConfig::default();
        prop_assert_eq!(scoring.score(&event, frequency), scoring.score(&event, frequency));
        prop_assert_eq!(scoring.factors(&event, frequency), scoring.factors(&event, frequency));
    }

    /// Fingerprints never depend on actor identity.
    #[test]
    fn fingerprint_is_actor_blind(event in event_strategy(), other_actor in "[a-z0-9]{1,8}") {
        let scoring = RiskScoringConfig::default();
        let frequency = u64::from(event.frequency_last_60s);
        let score = scoring.score(&event, frequency);

        let mut renamed = event.clone();
        renamed.actor_id = other_actor.clone();
        renamed.session_id = Uuid::from_u128(99);

        let a = signal_for(event, score);
        let mut b = signal_for(renamed, score);
        b.actor_id = other_actor;

        prop_assert_eq!(compute_fingerprint(&a), compute_fingerprint(&b));
    }
}

// ============================================================================
// Frequency Tracker
// ============================================================================

proptest! {
    /// Invariant 5: k records inside one window read back as exactly k,
    /// and the count drains to zero once the window passes.
    #[test]
    fn tracker_round_trips_and_expires(
        k in 1u64..200,
        bucket in 1u64..10,
        spread_ms in 0i64..50_000,
    ) {
        let tracker = FrequencyTracker::new(FrequencyConfig {
            window_seconds: 60,
            bucket_seconds: bucket,
        });
        let base = 1_700_000_000_000i64;
        for i in 0..k {
            // All records land within the window relative to the last one.
            let ts = base + (spread_ms * i as i64) / (k as i64).max(1);
            tracker.record("actor", ts);
        }
        let last = base + spread_ms;
        prop_assert_eq!(tracker.get_at("actor", last), k);
        // One window plus one bucket later, everything has aged out.
        let beyond = last + 60_000 + (bucket as i64) * 1_000;
        prop_assert_eq!(tracker.get_at("actor", beyond), 0);
    }
}

// ============================================================================
// Decision Cache
// ============================================================================

proptest! {
    /// Invariant 6: a put followed by a get within TTL returns the stored
    /// verdict, re-tagged as a cache hit.
    #[test]
    fn cache_round_trips_within_ttl(event in event_strategy(), score in 0.3f64..0.8) {
        let cache = DecisionCache::new(CacheConfig { max_size: 100, ttl_seconds: 300 });
        let signal = signal_for(event, score);
        let fingerprint = compute_fingerprint(&signal);
        let stored = ai_result("verdict-under-test");
        cache.put(fingerprint, stored.clone());

        let hit = cache.get(&fingerprint).expect("entry must be live within TTL");
        prop_assert_eq!(hit.decision, stored.decision);
        prop_assert_eq!(hit.confidence, stored.confidence);
        prop_assert_eq!(&hit.reason, &stored.reason);
        prop_assert_eq!(hit.source, DecisionSource::Cache);
    }

    /// Invariant 7: the cache never grows past its capacity, whatever the
    /// insertion sequence.
    #[test]
    fn cache_size_never_exceeds_capacity(
        capacity in 1usize..20,
        inserts in prop::collection::vec((0.3f64..0.8, "[a-z]{1,6}"), 1..100),
    ) {
        let cache = DecisionCache::new(CacheConfig { max_size: capacity, ttl_seconds: 300 });
        for (score, action) in inserts {
            let event = ActionEvent {
                actor_id: "x".to_string(),
                action,
                role: "developer".to_string(),
                frequency_last_60s: 0,
                geo_change: false,
                timestamp: 1_700_000_000_000,
                session_id: Uuid::from_u128(7),
                resource_sensitivity: Sensitivity::Medium,
            };
            let signal = signal_for(event, score);
            cache.put(compute_fingerprint(&signal), ai_result("r"));
            prop_assert!(cache.len() <= capacity);
        }
    }
}

// ============================================================================
// AI Queue (invariant 8)
// ============================================================================

/// Under sustained load past the concurrency limit, at most `C` model
/// invocations run at once; under load past the queue bound, the fallback
/// fires for at least (submits - Q) calls.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queue_bounds_concurrency_and_overflow() {
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    const CONCURRENT: usize = 10;
    const QUEUE: usize = 40;
    const SUBMITS: usize = 120;

    let queue = Arc::new(AiQueue::new(
        &AiConfig {
            max_concurrent: CONCURRENT,
            max_queue: QUEUE,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            ..AiConfig::default()
        },
        CancellationToken::new(),
    ));
    let live = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let fallbacks = Arc::new(AtomicU64::new(0));

    let mut handles = Vec::new();
    for _ in 0..SUBMITS {
        let queue = Arc::clone(&queue);
        let live = Arc::clone(&live);
        let peak = Arc::clone(&peak);
        let fallbacks = Arc::clone(&fallbacks);
        handles.push(tokio::spawn(async move {
            queue
                .submit(
                    || async {
                        let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                        live.fetch_sub(1, Ordering::SeqCst);
                        Ok(ai_result("model"))
                    },
                    || {
                        fallbacks.fetch_add(1, Ordering::SeqCst);
                        DecisionResult {
                            source: DecisionSource::Rule,
                            ..ai_result("fallback")
                        }
                    },
                )
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(
        peak.load(Ordering::SeqCst) <= CONCURRENT,
        "peak concurrency {} exceeded limit {CONCURRENT}",
        peak.load(Ordering::SeqCst)
    );
    let overflowed = queue.stats().overflowed;
    assert!(
        overflowed >= (SUBMITS - QUEUE) as u64,
        "expected at least {} overflows, saw {overflowed}",
        SUBMITS - QUEUE
    );
    assert_eq!(fallbacks.load(Ordering::SeqCst), overflowed);
    assert_eq!(queue.stats().completed + overflowed, SUBMITS as u64);
}
