//! Risk signals - the signal processor's output.

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::ActionEvent;

/// Processed risk indicators extracted from one [`ActionEvent`].
///
/// Flows through the signals topic with the same partition key as the
/// originating event. `correlation_id` is minted here and preserved onto the
/// resulting decision so auditors can join all three topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSignal {
    pub actor_id: String,
    /// Deterministic risk score in `[0, 1]`; out-of-range wire values are
    /// clamped on ingestion.
    #[serde(deserialize_with = "de_unit_interval")]
    pub risk_score: f64,
    /// Informational tags naming which subscores fired.
    pub risk_factors: Vec<String>,
    pub original_event: ActionEvent,
    /// Milliseconds since the Unix epoch, stamped at processing time.
    pub processing_timestamp: i64,
    pub correlation_id: Uuid,
}

impl RiskSignal {
    /// Partition key for the bus.
    pub fn key(&self) -> &str {
        &self.actor_id
    }
}

/// Clamp a float to the unit interval on deserialization.
pub(crate) fn de_unit_interval<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    Ok(raw.clamp(0.0, 1.0))
}
