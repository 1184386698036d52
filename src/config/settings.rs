//! Gatekeeper configuration - TOML file plus environment overrides.
//!
//! Every tunable has a built-in default matching the values the pipeline was
//! designed around, so the system runs with no config file at all. Loading
//! order for each field: environment variable > TOML file > default.
//! Environment always wins so deployments can override a shared file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

use super::defaults;
use crate::types::DecisionMode;

/// Configuration loading and validation errors. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value in environment variable {key}: {message}")]
    Env { key: String, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Sections
// ============================================================================

/// Bus connectivity, topic names, and wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Broker bootstrap list. Carried for parity with a durable-bus adapter;
    /// the in-memory bus ignores it.
    pub bootstrap_servers: String,
    pub events_topic: String,
    pub signals_topic: String,
    pub decisions_topic: String,
    /// Consumer-group base; stage suffixes are appended per stage.
    pub group_base: String,
    pub auto_offset_reset: String,
    pub partitions: u32,
    /// `json` (default) or `avro` (Confluent wire framing for events).
    pub wire_format: String,
    /// Schema id stamped into the Confluent wire prefix when `wire_format`
    /// is `avro`. A registry client would resolve this; here it is pinned.
    pub avro_schema_id: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            events_topic: defaults::EVENTS_TOPIC.to_string(),
            signals_topic: defaults::SIGNALS_TOPIC.to_string(),
            decisions_topic: defaults::DECISIONS_TOPIC.to_string(),
            group_base: defaults::GROUP_BASE.to_string(),
            auto_offset_reset: "latest".to_string(),
            partitions: defaults::PARTITIONS,
            wire_format: "json".to_string(),
            avro_schema_id: 1,
        }
    }
}

impl BusConfig {
    /// Consumer group name for a stage, e.g. `riskgate-signal-processor`.
    pub fn group_for(&self, stage: &str) -> String {
        format!("{}-{}", self.group_base, stage)
    }
}

/// Decision cache sizing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_size: usize,
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: defaults::CACHE_MAX_SIZE,
            ttl_seconds: defaults::CACHE_TTL_SECS,
        }
    }
}

/// AI queue tuning and backend endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub max_concurrent: usize,
    pub max_queue: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_seconds: u64,
    /// Hosted-model endpoint. When unset the engine runs rules-only and the
    /// AI path falls back without a backend.
    pub endpoint: Option<String>,
    pub model: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::AI_MAX_CONCURRENT,
            max_queue: defaults::AI_MAX_QUEUE,
            initial_backoff_ms: defaults::AI_INITIAL_BACKOFF_MS,
            max_backoff_ms: defaults::AI_MAX_BACKOFF_MS,
            timeout_seconds: defaults::AI_TIMEOUT_SECS,
            endpoint: None,
            model: "gemini-2.0-flash-lite".to_string(),
        }
    }
}

/// Decision engine routing bands and mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub low_threshold: f64,
    pub high_threshold: f64,
    pub mode: DecisionMode,
    /// Mark rule fallbacks issued on the AI path as provisional.
    pub provisional_fallbacks: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            low_threshold: defaults::LOW_THRESHOLD,
            high_threshold: defaults::HIGH_THRESHOLD,
            mode: DecisionMode::Hybrid,
            provisional_fallbacks: false,
        }
    }
}

/// Frequency tracker granularity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyConfig {
    pub window_seconds: u64,
    pub bucket_seconds: u64,
}

impl Default for FrequencyConfig {
    fn default() -> Self {
        Self {
            window_seconds: defaults::FREQ_WINDOW_SECS,
            bucket_seconds: defaults::FREQ_BUCKET_SECS,
        }
    }
}

/// Action dispatcher rate limiter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_seconds: u64,
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_seconds: defaults::RATE_LIMIT_WINDOW_SECS,
            max_requests: defaults::RATE_LIMIT_MAX,
        }
    }
}

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a gatekeeper deployment.
///
/// Load with [`GatekeeperConfig::load`], which searches:
/// 1. `$RISKGATE_CONFIG` env var (path to TOML file)
/// 2. `./riskgate.toml`
/// 3. Built-in defaults
///
/// and then applies environment overrides on top.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatekeeperConfig {
    pub bus: BusConfig,
    pub cache: CacheConfig,
    pub ai: AiConfig,
    pub engine: EngineConfig,
    pub frequency: FrequencyConfig,
    pub rate_limit: RateLimitConfig,
}

impl GatekeeperConfig {
    /// Load configuration using the standard search order plus env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("RISKGATE_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => {
                let default_path = Path::new("riskgate.toml");
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    info!("No config file found, using built-in defaults");
                    Self::default()
                }
            }
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a specific TOML file (no env overrides, no validation).
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Loaded gatekeeper config");
        Ok(config)
    }

    /// Apply recognised environment variables over the loaded values.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        override_string("BUS_BOOTSTRAP_SERVERS", &mut self.bus.bootstrap_servers);
        override_string("BUS_EVENTS_TOPIC", &mut self.bus.events_topic);
        override_string("BUS_SIGNALS_TOPIC", &mut self.bus.signals_topic);
        override_string("BUS_DECISIONS_TOPIC", &mut self.bus.decisions_topic);
        override_string("BUS_GROUP_BASE", &mut self.bus.group_base);
        override_string("BUS_AUTO_OFFSET_RESET", &mut self.bus.auto_offset_reset);
        override_string("BUS_WIRE_FORMAT", &mut self.bus.wire_format);
        override_parsed("BUS_PARTITIONS", &mut self.bus.partitions)?;
        override_parsed("BUS_SCHEMA_ID", &mut self.bus.avro_schema_id)?;

        override_parsed("CACHE_MAX_SIZE", &mut self.cache.max_size)?;
        override_parsed("CACHE_TTL_SECONDS", &mut self.cache.ttl_seconds)?;

        override_parsed("AI_MAX_CONCURRENT", &mut self.ai.max_concurrent)?;
        override_parsed("AI_MAX_QUEUE", &mut self.ai.max_queue)?;
        override_parsed("AI_INITIAL_BACKOFF_MS", &mut self.ai.initial_backoff_ms)?;
        override_parsed("AI_MAX_BACKOFF_MS", &mut self.ai.max_backoff_ms)?;
        override_parsed("AI_TIMEOUT_SECONDS", &mut self.ai.timeout_seconds)?;
        override_optional_string("AI_ENDPOINT", &mut self.ai.endpoint);
        override_string("AI_MODEL", &mut self.ai.model);

        override_parsed("THRESHOLD_LOW", &mut self.engine.low_threshold)?;
        override_parsed("THRESHOLD_HIGH", &mut self.engine.high_threshold)?;
        override_parsed("DECISION_MODE", &mut self.engine.mode)?;
        override_parsed(
            "PROVISIONAL_FALLBACKS",
            &mut self.engine.provisional_fallbacks,
        )?;

        override_parsed("FREQ_WINDOW_SECONDS", &mut self.frequency.window_seconds)?;
        override_parsed("FREQ_BUCKET_SECONDS", &mut self.frequency.bucket_seconds)?;

        override_parsed(
            "RATE_LIMIT_WINDOW_SECONDS",
            &mut self.rate_limit.window_seconds,
        )?;
        override_parsed("RATE_LIMIT_MAX", &mut self.rate_limit.max_requests)?;

        Ok(())
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.engine.low_threshold)
            || !(0.0..=1.0).contains(&self.engine.high_threshold)
        {
            return Err(ConfigError::Invalid(
                "thresholds must lie in [0, 1]".to_string(),
            ));
        }
        if self.engine.low_threshold >= self.engine.high_threshold {
            return Err(ConfigError::Invalid(format!(
                "THRESHOLD_LOW ({}) must be below THRESHOLD_HIGH ({})",
                self.engine.low_threshold, self.engine.high_threshold
            )));
        }
        if self.frequency.bucket_seconds == 0
            || self.frequency.bucket_seconds > self.frequency.window_seconds
        {
            return Err(ConfigError::Invalid(
                "FREQ_BUCKET_SECONDS must be nonzero and no larger than FREQ_WINDOW_SECONDS"
                    .to_string(),
            ));
        }
        if self.bus.partitions == 0 {
            return Err(ConfigError::Invalid(
                "BUS_PARTITIONS must be at least 1".to_string(),
            ));
        }
        if self.ai.max_concurrent == 0 || self.ai.max_queue < self.ai.max_concurrent {
            return Err(ConfigError::Invalid(
                "AI_MAX_QUEUE must be at least AI_MAX_CONCURRENT (both nonzero)".to_string(),
            ));
        }
        match self.bus.wire_format.as_str() {
            "json" | "avro" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "BUS_WIRE_FORMAT must be 'json' or 'avro', got '{other}'"
                )));
            }
        }
        if self.cache.max_size == 0 {
            warn!("CACHE_MAX_SIZE is 0 - decision cache effectively disabled");
        }
        Ok(())
    }
}

// ============================================================================
// Env Helpers
// ============================================================================

fn override_string(key: &str, target: &mut String) {
    if let Ok(value) = std::env::var(key) {
        if !value.is_empty() {
            *target = value;
        }
    }
}

fn override_optional_string(key: &str, target: &mut Option<String>) {
    if let Ok(value) = std::env::var(key) {
        if !value.is_empty() {
            *target = Some(value);
        }
    }
}

fn override_parsed<T>(key: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(value) = std::env::var(key) {
        if value.is_empty() {
            return Ok(());
        }
        *target = value.parse().map_err(|e: T::Err| ConfigError::Env {
            key: key.to_string(),
            message: e.to_string(),
        })?;
    }
    Ok(())
}
