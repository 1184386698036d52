//! Synthetic event generator for demo mode.
//!
//! Publishes a weighted mix of actor profiles onto the events topic so the
//! full pipeline - frequency tracking, band routing, caching, throttling -
//! lights up without any external event source. Generation exists only to
//! feed demo runs; it is not a load-testing harness.

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::bus::{EventCodec, MessageBus};
use crate::config::GatekeeperConfig;
use crate::types::{now_ms, ActionEvent, Sensitivity};

/// What a generated actor is up to.
#[derive(Debug, Clone, Copy)]
enum Profile {
    /// Routine work: low frequency, benign resources.
    Normal,
    /// Scripted exfiltration: one actor hammering bulk exports.
    Burst,
    /// Credential theft signature: new geography plus sensitive resources.
    GeoHopper,
    /// Standing privilege: admin/root doing admin things.
    Privileged,
}

fn pick_profile<R: Rng>(rng: &mut R) -> Profile {
    match rng.gen_range(0..100) {
        0..=69 => Profile::Normal,
        70..=79 => Profile::Burst,
        80..=89 => Profile::GeoHopper,
        _ => Profile::Privileged,
    }
}

fn generate_event<R: Rng>(rng: &mut R, sequence: u64) -> ActionEvent {
    let profile = pick_profile(rng);
    let (actor_id, role, action, geo_change, sensitivity) = match profile {
        Profile::Normal => (
            format!("user-{:02}", rng.gen_range(0..20)),
            *["developer", "analyst", "support"]
                .choose(rng)
                .unwrap_or(&"developer"),
            *["file_read", "file_write", "report_view"]
                .choose(rng)
                .unwrap_or(&"file_read"),
            rng.gen_bool(0.02),
            *[Sensitivity::Low, Sensitivity::Medium]
                .choose(rng)
                .unwrap_or(&Sensitivity::Low),
        ),
        Profile::Burst => (
            format!("burst-bot-{}", rng.gen_range(0..2)),
            "developer",
            "bulk_export",
            rng.gen_bool(0.5),
            Sensitivity::Critical,
        ),
        Profile::GeoHopper => (
            format!("roamer-{}", rng.gen_range(0..3)),
            "analyst",
            "config_change",
            true,
            *[Sensitivity::High, Sensitivity::Critical]
                .choose(rng)
                .unwrap_or(&Sensitivity::High),
        ),
        Profile::Privileged => (
            format!("admin-{}", rng.gen_range(0..3)),
            *["admin", "root"].choose(rng).unwrap_or(&"admin"),
            *["admin_access", "config_change", "data_delete"]
                .choose(rng)
                .unwrap_or(&"admin_access"),
            rng.gen_bool(0.1),
            *[Sensitivity::Medium, Sensitivity::High]
                .choose(rng)
                .unwrap_or(&Sensitivity::Medium),
        ),
    };

    ActionEvent {
        actor_id,
        action: action.to_string(),
        role: role.to_string(),
        // Client-observed frequency; the signal processor's tracker reading
        // supersedes it, so a rough guess is fine here.
        frequency_last_60s: rng.gen_range(0..5) + u32::from(sequence % 10 == 0),
        geo_change,
        timestamp: now_ms(),
        session_id: Uuid::new_v4(),
        resource_sensitivity: sensitivity,
    }
}

/// Publish `count` synthetic events to the events topic, pacing them by
/// `interval` (zero = as fast as possible). Returns the number published.
pub async fn publish_demo_events(
    bus: &Arc<dyn MessageBus>,
    config: &GatekeeperConfig,
    count: u64,
    interval: Duration,
) -> Result<u64> {
    let codec = EventCodec::from_config(&config.bus);
    let producer = bus.producer().context("demo producer")?;
    let mut rng = rand::thread_rng();

    info!(count, "Publishing synthetic demo events");
    for sequence in 0..count {
        let event = generate_event(&mut rng, sequence);
        let payload = codec.encode(&event).context("demo event encode")?;
        producer
            .send(&config.bus.events_topic, event.key(), payload)
            .await
            .context("demo event publish")?;
        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }
    info!(count, "Demo events published");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_events_are_well_formed() {
        let mut rng = rand::thread_rng();
        for sequence in 0..200 {
            let event = generate_event(&mut rng, sequence);
            assert!(!event.actor_id.is_empty());
            assert!(!event.action.is_empty());
            assert!(event.timestamp > 0);
        }
    }

    #[test]
    fn generator_covers_multiple_profiles() {
        let mut rng = rand::thread_rng();
        let events: Vec<ActionEvent> = (0..500).map(|i| generate_event(&mut rng, i)).collect();
        assert!(events.iter().any(|e| e.actor_id.starts_with("user-")));
        assert!(events.iter().any(|e| e.actor_id.starts_with("burst-bot-")));
        assert!(events.iter().any(|e| e.actor_id.starts_with("roamer-")));
        assert!(events.iter().any(|e| e.actor_id.starts_with("admin-")));
    }
}
