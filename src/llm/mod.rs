//! Model backend for ambiguous-band risk assessment.
//!
//! The decision engine consults a hosted model for signals the rules cannot
//! settle. The backend contract is narrow: take a risk signal, return the
//! model's raw text. Prompt construction and strict response parsing live
//! here so every backend (HTTP, offline mock, test scripts) shares the same
//! wire discipline.

mod backend;
mod parse;

pub use backend::{HttpBackend, MockBackend, RiskBackend};
pub use parse::{parse_response, ParsedVerdict};

use thiserror::Error;

/// Backend call failures.
///
/// Parse problems are NOT errors at this level - a malformed model response
/// still yields a (safe-default) verdict via [`parse_response`]. Only
/// transport-level failures surface here.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("model rate limited: {0}")]
    RateLimited(String),

    #[error("model request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("model backend error: {0}")]
    Other(String),
}

impl BackendError {
    /// Whether this failure should advance the AI queue's backoff.
    ///
    /// Matches the provider conventions: explicit rate-limit variant, or an
    /// error text mentioning `rate`, `429`, or `quota` (case-insensitive).
    pub fn is_rate_limit_shaped(&self) -> bool {
        match self {
            BackendError::RateLimited(_) => true,
            BackendError::Timeout(_) => false,
            BackendError::Other(message) => {
                let lower = message.to_ascii_lowercase();
                lower.contains("rate") || lower.contains("429") || lower.contains("quota")
            }
        }
    }
}

/// Build the assessment prompt for one risk signal.
///
/// The model is asked for a bare JSON object; [`parse_response`] tolerates
/// fenced output anyway.
pub fn build_prompt(signal: &crate::types::RiskSignal) -> String {
    let factors = if signal.risk_factors.is_empty() {
        "none".to_string()
    } else {
        signal.risk_factors.join(", ")
    };
    format!(
        "You are a security risk assessment AI. Analyze this risk signal and provide a decision.\n\
         \n\
         Risk Signal:\n\
         - Actor ID: {actor}\n\
         - Risk Score: {score:.2}\n\
         - Risk Factors: {factors}\n\
         - Action: {action}\n\
         - Role: {role}\n\
         - Frequency (last 60s): {frequency}\n\
         - Geographic Change: {geo}\n\
         - Resource Sensitivity: {sensitivity}\n\
         \n\
         Respond with JSON only:\n\
         {{\"decision\": \"allow|throttle|block|escalate\", \"confidence\": 0.0-1.0, \"reason\": \"brief explanation\"}}",
        actor = signal.actor_id,
        score = signal.risk_score,
        factors = factors,
        action = signal.original_event.action,
        role = signal.original_event.role,
        frequency = signal.original_event.frequency_last_60s,
        geo = signal.original_event.geo_change,
        sensitivity = signal.original_event.resource_sensitivity,
    )
}
