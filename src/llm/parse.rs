//! Strict parsing of model responses.

use serde::Deserialize;
use tracing::debug;

use crate::types::{Decision, RiskSignal};

/// A verdict extracted from model output.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedVerdict {
    pub decision: Decision,
    pub confidence: f64,
    pub reason: String,
    /// True when the response could not be parsed and the safe default was
    /// substituted. Safe-default verdicts must never enter the cache.
    pub parse_fallback: bool,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    decision: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reason: Option<String>,
}

/// Parse a model response into a verdict.
///
/// - Surrounding code-fence markers are stripped before parsing.
/// - Unknown decisions coerce to `escalate`.
/// - Confidence is clamped to `[0, 1]`.
/// - On any parse failure the safe default applies: `throttle @ 0.6` when
///   the signal's score is >= 0.6, otherwise `allow @ 0.6`, with a reason
///   noting the failure.
pub fn parse_response(text: &str, signal: &RiskSignal) -> ParsedVerdict {
    let body = strip_fences(text);
    match serde_json::from_str::<RawVerdict>(body) {
        Ok(raw) => ParsedVerdict {
            decision: Decision::parse_lossy(raw.decision.trim()),
            confidence: raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
            reason: raw
                .reason
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| "model verdict".to_string()),
            parse_fallback: false,
        },
        Err(e) => {
            debug!(error = %e, "Unparseable model response, using safe default");
            safe_default(signal)
        }
    }
}

/// The rule-derived verdict used when the model's answer is untrustworthy.
fn safe_default(signal: &RiskSignal) -> ParsedVerdict {
    let decision = if signal.risk_score >= 0.6 {
        Decision::Throttle
    } else {
        Decision::Allow
    };
    ParsedVerdict {
        decision,
        confidence: 0.6,
        reason: "model response parsing failed, using fallback".to_string(),
        parse_fallback: true,
    }
}

/// Remove a surrounding markdown code fence, if present.
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. ```json) up to the first newline.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}
