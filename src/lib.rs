//! riskgate: real-time risk gatekeeping for enterprise actions
//!
//! Four-stage streaming pipeline over a partitioned message bus:
//!
//! - **Signal Processor**: deterministic risk scoring enriched by a
//!   sliding-window frequency tracker
//! - **Decision Engine**: hybrid routing across fast rules, a TTL+LRU
//!   pattern cache, and a bounded AI queue with rule fallback
//! - **Action Dispatcher**: per-actor rate limiting, decision counters,
//!   audit emission
//! - **Flow control**: per-actor keyed partitioning keeps each actor's
//!   events in order end to end

pub mod agents;
pub mod bus;
pub mod config;
pub mod demo;
pub mod llm;
pub mod pipeline;
pub mod types;

// Re-export configuration
pub use config::GatekeeperConfig;

// Re-export commonly used types
pub use types::{
    ActionEvent, Decision, DecisionMode, DecisionResult, DecisionSource, RiskDecision,
    RiskSignal, Sensitivity,
};

// Re-export the stage agents and shared components
pub use agents::{
    ActionDispatcher, AiQueue, DecisionCache, DecisionEngine, FrequencyTracker, RateLimiter,
    RiskScoringConfig, SignalProcessor,
};

// Re-export pipeline wiring
pub use pipeline::{Pipeline, PipelineStats};

// Re-export the bus abstraction
pub use bus::{EventCodec, InMemoryBus, MessageBus};
