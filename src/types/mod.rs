//! Shared data structures for the risk gatekeeper pipeline
//!
//! Everything that crosses a stage boundary lives here:
//! - Stage A input: [`ActionEvent`] (enterprise action, keyed by actor)
//! - Stage A -> B: [`RiskSignal`] (score + factors + originating event)
//! - Stage B -> C: [`RiskDecision`] (the published verdict)
//! - Stage B internal: [`DecisionResult`] (verdict + routing metadata,
//!   never crosses the bus)

mod decision;
mod event;
mod signal;

pub use decision::*;
pub use event::*;
pub use signal::*;

/// Current wall clock as milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
