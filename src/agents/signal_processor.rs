//! Signal extraction - Stage A of the gatekeeper pipeline.
//!
//! Consumes action events, computes a deterministic risk score plus
//! informational factor tags, and publishes risk signals keyed by actor.
//! The only state consulted beyond the event itself is the shared
//! [`FrequencyTracker`], whose sliding-window count replaces the event's
//! client-observed frequency when available.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::FrequencyTracker;
use crate::bus::{BusRecord, CodecError, EventCodec};
use crate::pipeline::{StageError, StageHandler};
use crate::types::{now_ms, ActionEvent, RiskSignal, Sensitivity};

// ============================================================================
// Scoring Configuration
// ============================================================================

/// Deterministic risk scoring parameters.
///
/// The score is a weighted sum of four subscores (frequency, geography,
/// sensitivity, role/action), clamped to `[0, 1]`. Defaults match the bands
/// the downstream thresholds were tuned against.
#[derive(Debug, Clone)]
pub struct RiskScoringConfig {
    /// Frequencies at or below this are unremarkable.
    pub normal_frequency_max: u64,
    /// Above this, frequency reads as elevated.
    pub elevated_frequency_threshold: u64,
    /// Above this, frequency reads as hostile.
    pub high_frequency_threshold: u64,

    pub frequency_weight: f64,
    pub geo_change_weight: f64,
    pub sensitivity_weight: f64,
    pub role_action_weight: f64,

    /// (role, action) pairs outside normal duties; full role/action subscore.
    pub suspicious_combinations: Vec<(String, String)>,
    /// Roles with standing elevated privileges; partial subscore.
    pub elevated_roles: Vec<String>,
}

impl Default for RiskScoringConfig {
    fn default() -> Self {
        Self {
            normal_frequency_max: 5,
            elevated_frequency_threshold: 10,
            high_frequency_threshold: 20,
            frequency_weight: 0.30,
            geo_change_weight: 0.25,
            sensitivity_weight: 0.25,
            role_action_weight: 0.20,
            suspicious_combinations: [
                ("developer", "admin_access"),
                ("analyst", "config_change"),
                ("support", "data_delete"),
                ("developer", "bulk_export"),
            ]
            .into_iter()
            .map(|(role, action)| (role.to_string(), action.to_string()))
            .collect(),
            elevated_roles: ["admin", "superuser", "root"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

impl RiskScoringConfig {
    fn frequency_subscore(&self, frequency: u64) -> f64 {
        if frequency > self.high_frequency_threshold {
            1.0
        } else if frequency > self.elevated_frequency_threshold {
            0.6
        } else if frequency > self.normal_frequency_max {
            0.3
        } else {
            0.0
        }
    }

    fn sensitivity_subscore(sensitivity: Sensitivity) -> f64 {
        match sensitivity {
            Sensitivity::Low => 0.1,
            Sensitivity::Medium => 0.3,
            Sensitivity::High => 0.6,
            Sensitivity::Critical => 1.0,
            Sensitivity::Unknown => 0.3,
        }
    }

    fn is_suspicious_combination(&self, event: &ActionEvent) -> bool {
        self.suspicious_combinations
            .iter()
            .any(|(role, action)| *role == event.role && *action == event.action)
    }

    fn is_elevated_role(&self, event: &ActionEvent) -> bool {
        self.elevated_roles.iter().any(|role| *role == event.role)
    }

    /// Compute the risk score for an event given the authoritative
    /// frequency reading.
    pub fn score(&self, event: &ActionEvent, frequency: u64) -> f64 {
        let mut score = 0.0;
        score += self.frequency_subscore(frequency) * self.frequency_weight;
        if event.geo_change {
            score += 1.0 * self.geo_change_weight;
        }
        score += Self::sensitivity_subscore(event.resource_sensitivity) * self.sensitivity_weight;
        if self.is_suspicious_combination(event) {
            score += 1.0 * self.role_action_weight;
        } else if self.is_elevated_role(event) {
            score += 0.3 * self.role_action_weight;
        }
        score.clamp(0.0, 1.0)
    }

    /// Identify the factor tags for an event.
    ///
    /// Tags are purely informational; downstream decisions key off the
    /// numeric score, never tag presence.
    pub fn factors(&self, event: &ActionEvent, frequency: u64) -> Vec<String> {
        let mut factors = Vec::new();

        if frequency > self.high_frequency_threshold {
            factors.push(format!("high_frequency_activity ({frequency}/min)"));
        } else if frequency > self.elevated_frequency_threshold {
            factors.push(format!("elevated_frequency ({frequency}/min)"));
        }

        if event.geo_change {
            factors.push("geographic_anomaly".to_string());
        }

        if matches!(
            event.resource_sensitivity,
            Sensitivity::High | Sensitivity::Critical
        ) {
            factors.push(format!(
                "sensitive_resource_{}",
                event.resource_sensitivity
            ));
        }

        if self.is_suspicious_combination(event) {
            factors.push("suspicious_role_action_combination".to_string());
        }

        if self.is_elevated_role(event) {
            factors.push("elevated_privileges".to_string());
        }

        if matches!(
            event.action.as_str(),
            "bulk_export" | "data_delete" | "config_change"
        ) {
            factors.push(format!("sensitive_action_{}", event.action));
        }

        factors
    }
}

// ============================================================================
// Signal Processor
// ============================================================================

/// Stage A handler: decode event, score, tag, emit signal.
pub struct SignalProcessor {
    scoring: RiskScoringConfig,
    /// Shared sliding-window oracle; `None` falls back to the event's own
    /// client-observed frequency.
    tracker: Option<Arc<FrequencyTracker>>,
}

impl SignalProcessor {
    pub fn new(scoring: RiskScoringConfig, tracker: Option<Arc<FrequencyTracker>>) -> Self {
        Self { scoring, tracker }
    }

    /// Score one event into a risk signal. Total function; the only side
    /// effect is the tracker recording.
    pub fn process_event(&self, event: ActionEvent) -> RiskSignal {
        let frequency = match &self.tracker {
            Some(tracker) => tracker.record(&event.actor_id, event.timestamp),
            None => u64::from(event.frequency_last_60s),
        };

        let risk_score = self.scoring.score(&event, frequency);
        let risk_factors = self.scoring.factors(&event, frequency);

        debug!(
            actor_id = %event.actor_id,
            risk_score,
            frequency,
            factor_count = risk_factors.len(),
            "Event scored"
        );

        RiskSignal {
            actor_id: event.actor_id.clone(),
            risk_score,
            risk_factors,
            original_event: event,
            processing_timestamp: now_ms(),
            correlation_id: Uuid::new_v4(),
        }
    }
}

#[async_trait]
impl StageHandler for SignalProcessor {
    async fn handle(&mut self, record: &BusRecord) -> Result<Option<(String, Vec<u8>)>, StageError> {
        let event = EventCodec::decode(&record.payload)
            .map_err(|e: CodecError| StageError::Skip(e.to_string()))?;
        let signal = self.process_event(event);
        let payload = serde_json::to_vec(&signal)
            .map_err(|e| StageError::Fatal(anyhow::Error::new(e).context("signal encode")))?;
        Ok(Some((signal.actor_id, payload)))
    }
}
