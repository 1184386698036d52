//! Stage agents and the shared components they lean on.
//!
//! - Stage A: [`SignalProcessor`] + [`FrequencyTracker`]
//! - Stage B: [`DecisionEngine`] + [`DecisionCache`] + [`AiQueue`]
//! - Stage C: [`ActionDispatcher`] + [`RateLimiter`]

mod action_dispatcher;
mod ai_queue;
mod decision_cache;
mod decision_engine;
mod frequency_tracker;
mod signal_processor;

pub use action_dispatcher::{ActionDispatcher, DispatchCounters, DispatchStats, RateLimiter};
pub use ai_queue::{AiQueue, QueueStats};
pub use decision_cache::{compute_fingerprint, CacheStats, DecisionCache, Fingerprint};
pub use decision_engine::{DecisionEngine, DecisionStage, EngineStats};
pub use frequency_tracker::{FrequencyTracker, TrackerStats};
pub use signal_processor::{RiskScoringConfig, SignalProcessor};
