//! Risk decisions and the decision engine's internal result type.

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// ============================================================================
// Decision Verdict
// ============================================================================

/// The verdict for a single enterprise action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Throttle,
    Block,
    Escalate,
}

impl Decision {
    /// Parse a lowercase wire string; `None` for anything unrecognized.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(Decision::Allow),
            "throttle" => Some(Decision::Throttle),
            "block" => Some(Decision::Block),
            "escalate" => Some(Decision::Escalate),
            _ => None,
        }
    }

    /// Parse with the safe default: unknown verdicts become `Escalate`.
    pub fn parse_lossy(s: &str) -> Self {
        Self::parse(s).unwrap_or(Decision::Escalate)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Throttle => "throttle",
            Decision::Block => "block",
            Decision::Escalate => "escalate",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Lossy on the wire too: a decision message with an unrecognized verdict must
// still dispatch (as escalate), not poison the partition.
impl<'de> Deserialize<'de> for Decision {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Decision::parse_lossy(&raw))
    }
}

// ============================================================================
// Routing Metadata
// ============================================================================

/// Which path produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    Rule,
    Cache,
    Ai,
}

impl DecisionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionSource::Rule => "rule",
            DecisionSource::Cache => "cache",
            DecisionSource::Ai => "ai",
        }
    }
}

impl std::fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision engine operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMode {
    /// Rules only; never consults cache or AI.
    Fast,
    /// Rules for clear cases, cache then AI for the ambiguous band.
    #[default]
    Hybrid,
    /// Rules for clear cases, AI for everything else (no cache short-circuit).
    FullAi,
}

impl DecisionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionMode::Fast => "fast",
            DecisionMode::Hybrid => "hybrid",
            DecisionMode::FullAi => "full_ai",
        }
    }
}

impl std::fmt::Display for DecisionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DecisionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(DecisionMode::Fast),
            "hybrid" => Ok(DecisionMode::Hybrid),
            "full_ai" | "full-ai" | "fullai" => Ok(DecisionMode::FullAi),
            other => Err(format!(
                "unknown decision mode '{other}' (expected fast, hybrid, or full_ai)"
            )),
        }
    }
}

// ============================================================================
// Published Decision
// ============================================================================

/// The published verdict for one risk signal.
///
/// Flows through the decisions topic, partition key = `actor_id`, with the
/// signal's `correlation_id` propagated unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub actor_id: String,
    pub decision: Decision,
    /// Confidence in `[0, 1]`; clamped on ingestion.
    #[serde(deserialize_with = "super::signal::de_unit_interval")]
    pub confidence: f64,
    pub reason: String,
    pub correlation_id: Uuid,
    /// Milliseconds since the Unix epoch.
    pub decision_timestamp: i64,
}

impl RiskDecision {
    /// Partition key for the bus.
    pub fn key(&self) -> &str {
        &self.actor_id
    }
}

// ============================================================================
// Internal Decision Result
// ============================================================================

/// A decision plus routing and performance metadata.
///
/// Produced by the decision engine and consumed by the action dispatcher;
/// never crosses the bus. Serialize support exists for stats/debug output
/// only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionResult {
    pub decision: Decision,
    pub confidence: f64,
    pub reason: String,
    pub source: DecisionSource,
    pub latency_ms: f64,
    /// True only when `engine.provisional_fallbacks` is enabled and this is a
    /// rule fallback issued while the AI path could not answer.
    pub provisional: bool,
    pub correlation_id: Uuid,
    pub actor_id: String,
}

impl DecisionResult {
    /// Convert to the wire form published on the decisions topic.
    pub fn into_risk_decision(self, decision_timestamp: i64) -> RiskDecision {
        RiskDecision {
            actor_id: self.actor_id,
            decision: self.decision,
            confidence: self.confidence,
            reason: self.reason,
            correlation_id: self.correlation_id,
            decision_timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_wire_form_is_lowercase() {
        assert_eq!(serde_json::to_string(&Decision::Block).unwrap(), "\"block\"");
        assert_eq!(
            serde_json::to_string(&DecisionSource::Cache).unwrap(),
            "\"cache\""
        );
    }

    #[test]
    fn unknown_decision_deserializes_to_escalate() {
        let parsed: Decision = serde_json::from_str("\"quarantine\"").unwrap();
        assert_eq!(parsed, Decision::Escalate);
    }

    #[test]
    fn mode_parses_from_config_strings() {
        assert_eq!("fast".parse::<DecisionMode>().unwrap(), DecisionMode::Fast);
        assert_eq!(
            "FULL_AI".parse::<DecisionMode>().unwrap(),
            DecisionMode::FullAi
        );
        assert!("ludicrous".parse::<DecisionMode>().is_err());
    }

    #[test]
    fn decision_result_converts_to_wire_decision() {
        let correlation_id = Uuid::new_v4();
        let result = DecisionResult {
            decision: Decision::Throttle,
            confidence: 0.7,
            reason: "Medium risk (55%) - rate limited by rules".to_string(),
            source: DecisionSource::Rule,
            latency_ms: 0.2,
            provisional: false,
            correlation_id,
            actor_id: "u7".to_string(),
        };
        let decision = result.into_risk_decision(1_700_000_000_500);
        assert_eq!(decision.decision, Decision::Throttle);
        assert_eq!(decision.correlation_id, correlation_id);
        assert_eq!(decision.decision_timestamp, 1_700_000_000_500);
    }
}
