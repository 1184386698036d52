//! Enterprise action events - the raw input to the pipeline.

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Sensitivity classification of the resource an action touches.
///
/// Unrecognized wire values deserialize to [`Sensitivity::Unknown`] rather
/// than failing the whole event; scoring treats unknown as medium-ish risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    Medium,
    High,
    Critical,
    #[serde(other)]
    Unknown,
}

impl Sensitivity {
    /// Stable lowercase name used in risk-factor tags and fingerprints.
    pub fn as_str(self) -> &'static str {
        match self {
            Sensitivity::Low => "low",
            Sensitivity::Medium => "medium",
            Sensitivity::High => "high",
            Sensitivity::Critical => "critical",
            Sensitivity::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sensitive enterprise action awaiting risk assessment.
///
/// Flows through the events topic, keyed by `actor_id` so all events for one
/// actor land on the same partition and stay ordered. The event carries the
/// client-observed `frequency_last_60s`; the signal processor replaces it
/// with the authoritative sliding-window count when the tracker is enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEvent {
    pub actor_id: String,
    pub action: String,
    pub role: String,
    /// Client-observed events in the last minute. Negative wire values are
    /// normalised to zero on ingestion.
    #[serde(deserialize_with = "de_count")]
    pub frequency_last_60s: u32,
    pub geo_change: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub session_id: Uuid,
    pub resource_sensitivity: Sensitivity,
}

impl ActionEvent {
    /// Partition key for the bus.
    pub fn key(&self) -> &str {
        &self.actor_id
    }
}

/// Accept any signed integer and clamp to `u32` range.
fn de_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    Ok(u32::try_from(raw.max(0)).unwrap_or(u32::MAX))
}
