//! Pipeline wiring: three stage workers under one cancellation token.
//!
//! The stages communicate only through bus topics, so each worker runs as
//! its own task and could just as well run in its own process; this module
//! is the single-process wiring used by the binary and the test suite.

mod worker;

pub use worker::{StageError, StageHandler, StageWorker, WorkerCounters, WorkerStats};

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::agents::{
    ActionDispatcher, AiQueue, DecisionCache, DecisionEngine, DecisionStage, DispatchCounters,
    DispatchStats, EngineStats, FrequencyTracker, RiskScoringConfig, SignalProcessor,
    TrackerStats,
};
use crate::bus::MessageBus;
use crate::config::defaults::POLL_TIMEOUT_MS;
use crate::config::GatekeeperConfig;
use crate::llm::RiskBackend;

/// Aggregate statistics across all stages and shared components.
///
/// Each embedded snapshot is consistent per component; snapshots across
/// components are not atomic with respect to each other.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub signal_processor: WorkerStats,
    pub decision_engine: WorkerStats,
    pub action_dispatcher: WorkerStats,
    pub tracker: TrackerStats,
    pub engine: EngineStats,
    pub dispatch: DispatchStats,
}

impl PipelineStats {
    /// Log the end-of-run summary block.
    pub fn log_summary(&self) {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!("📊 PIPELINE STATISTICS");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!(
            "   Events Scored:     {} ({} failed)",
            self.signal_processor.events_processed, self.signal_processor.events_failed
        );
        info!(
            "   Decisions Made:    {} (rule {} / ai {} / fallbacks {})",
            self.engine.decisions_made,
            self.engine.rule_decisions,
            self.engine.ai_decisions,
            self.engine.ai_failures
        );
        info!(
            "   Cache:             {} hits / {} misses ({}% hit rate)",
            self.engine.cache.hits, self.engine.cache.misses, self.engine.cache.hit_rate_percent
        );
        info!(
            "   Outcomes:          allow {} | throttle {} | block {} | escalate {}",
            self.dispatch.allows,
            self.dispatch.throttles,
            self.dispatch.blocks,
            self.dispatch.escalations
        );
        info!("   Rate Limited:      {}", self.dispatch.rate_limited);
        info!(
            "   Latency (avg ms):  rule {:.2} | cache {:.2} | ai {:.2}",
            self.engine.avg_rule_latency_ms,
            self.engine.avg_cache_latency_ms,
            self.engine.avg_ai_latency_ms
        );
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }
}

/// A running pipeline: three stage tasks plus handles for stats and mode
/// switching.
pub struct Pipeline {
    cancel: CancellationToken,
    tasks: JoinSet<Result<u64>>,
    tracker: Arc<FrequencyTracker>,
    engine: Arc<DecisionEngine>,
    dispatch_counters: Arc<DispatchCounters>,
    signal_counters: Arc<WorkerCounters>,
    decision_counters: Arc<WorkerCounters>,
    dispatch_worker_counters: Arc<WorkerCounters>,
}

impl Pipeline {
    /// Wire and start the three stage workers.
    ///
    /// `backend` is the model used for the ambiguous band; `None` runs the
    /// engine with rule fallbacks on the AI path.
    pub fn start(
        bus: Arc<dyn MessageBus>,
        config: &GatekeeperConfig,
        backend: Option<Arc<dyn RiskBackend>>,
    ) -> Result<Self> {
        let cancel = CancellationToken::new();
        let poll_timeout = Duration::from_millis(POLL_TIMEOUT_MS);

        // Shared components, injected by handle.
        let tracker = Arc::new(FrequencyTracker::new(config.frequency));
        let cache = Arc::new(DecisionCache::new(config.cache));
        let queue = Arc::new(AiQueue::new(&config.ai, cancel.child_token()));
        let engine = Arc::new(DecisionEngine::new(
            config.engine,
            cache,
            queue,
            backend,
        ));

        let mut tasks = JoinSet::new();

        // Stage A: events -> signals
        let mut signal_worker = StageWorker::new(
            "signal-processor",
            Arc::clone(&bus),
            config.bus.events_topic.clone(),
            config.bus.group_for("signal-processor"),
            Some(config.bus.signals_topic.clone()),
            SignalProcessor::new(RiskScoringConfig::default(), Some(Arc::clone(&tracker))),
            cancel.child_token(),
        );
        let signal_counters = signal_worker.counters();
        signal_worker.connect().context("signal processor connect")?;
        tasks.spawn(async move {
            let outcome = signal_worker.run(None, poll_timeout).await;
            signal_worker.disconnect().await;
            outcome
        });

        // Stage B: signals -> decisions
        let mut decision_worker = StageWorker::new(
            "decision-engine",
            Arc::clone(&bus),
            config.bus.signals_topic.clone(),
            config.bus.group_for("decision-engine"),
            Some(config.bus.decisions_topic.clone()),
            DecisionStage::new(Arc::clone(&engine)),
            cancel.child_token(),
        );
        let decision_counters = decision_worker.counters();
        decision_worker.connect().context("decision engine connect")?;
        tasks.spawn(async move {
            let outcome = decision_worker.run(None, poll_timeout).await;
            decision_worker.disconnect().await;
            outcome
        });

        // Stage C: decisions -> enforcement
        let dispatcher = ActionDispatcher::new(config.rate_limit);
        let dispatch_counters = dispatcher.counters();
        let mut dispatch_worker = StageWorker::new(
            "action-dispatcher",
            Arc::clone(&bus),
            config.bus.decisions_topic.clone(),
            config.bus.group_for("action-dispatcher"),
            None,
            dispatcher,
            cancel.child_token(),
        );
        let dispatch_worker_counters = dispatch_worker.counters();
        dispatch_worker.connect().context("action dispatcher connect")?;
        tasks.spawn(async move {
            let outcome = dispatch_worker.run(None, poll_timeout).await;
            dispatch_worker.disconnect().await;
            outcome
        });

        info!(mode = %engine.mode(), "Pipeline started (3 stage workers)");

        Ok(Self {
            cancel,
            tasks,
            tracker,
            engine,
            dispatch_counters,
            signal_counters,
            decision_counters,
            dispatch_worker_counters,
        })
    }

    /// Decision engine handle (mode switching, stats).
    pub fn engine(&self) -> Arc<DecisionEngine> {
        Arc::clone(&self.engine)
    }

    /// Aggregate stats snapshot.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            signal_processor: self.signal_counters.snapshot(),
            decision_engine: self.decision_counters.snapshot(),
            action_dispatcher: self.dispatch_worker_counters.snapshot(),
            tracker: self.tracker.stats(),
            engine: self.engine.stats(),
            dispatch: self.dispatch_counters.snapshot(),
        }
    }

    /// Wait for every stage to finish naturally (input stream ended).
    pub async fn wait(mut self) -> PipelineStats {
        while let Some(joined) = self.tasks.join_next().await {
            Self::log_outcome(joined);
        }
        self.stats()
    }

    /// Cancel all stages and wait for them to drain.
    pub async fn shutdown(mut self) -> PipelineStats {
        info!("Pipeline shutdown requested");
        self.cancel.cancel();
        while let Some(joined) = self.tasks.join_next().await {
            Self::log_outcome(joined);
        }
        self.stats()
    }

    fn log_outcome(joined: std::result::Result<Result<u64>, tokio::task::JoinError>) {
        match joined {
            Ok(Ok(processed)) => info!(processed, "Stage worker finished"),
            Ok(Err(e)) => error!(error = %e, "Stage worker failed"),
            Err(e) => error!(error = %e, "Stage task panicked or was aborted"),
        }
    }
}
