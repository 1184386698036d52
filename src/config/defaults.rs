//! System-wide default constants.
//!
//! Centralises the tunables referenced from more than one subsystem.
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Bus
// ============================================================================

/// Topic carrying raw enterprise action events.
pub const EVENTS_TOPIC: &str = "enterprise-action-events";

/// Topic carrying processed risk signals.
pub const SIGNALS_TOPIC: &str = "risk-signals";

/// Topic carrying published risk decisions.
pub const DECISIONS_TOPIC: &str = "risk-decisions";

/// Consumer group base name; stages append their own suffix
/// (`-signal-processor`, `-decision-engine`, `-action-dispatcher`).
pub const GROUP_BASE: &str = "riskgate";

/// Partition count for the in-memory bus.
pub const PARTITIONS: u32 = 3;

/// Bounded producer flush on stage disconnect (seconds).
pub const PRODUCER_FLUSH_TIMEOUT_SECS: u64 = 10;

/// Default consumer poll timeout for stage loops (milliseconds).
pub const POLL_TIMEOUT_MS: u64 = 1_000;

// ============================================================================
// Decision Engine
// ============================================================================

/// Risk score below this is auto-allowed by rules.
pub const LOW_THRESHOLD: f64 = 0.3;

/// Risk score above this is auto-blocked by rules.
pub const HIGH_THRESHOLD: f64 = 0.8;

/// Decision cache capacity (entries).
pub const CACHE_MAX_SIZE: usize = 1_000;

/// Decision cache entry time-to-live (seconds).
pub const CACHE_TTL_SECS: u64 = 300;

/// Moving-average window for per-source latency stats (samples).
pub const LATENCY_WINDOW: usize = 100;

// ============================================================================
// AI Queue
// ============================================================================

/// Maximum concurrent backend requests.
pub const AI_MAX_CONCURRENT: usize = 10;

/// Maximum logical queue depth (in-flight + waiting) before overflow fallback.
pub const AI_MAX_QUEUE: usize = 100;

/// First backoff step after a rate-limit-shaped error (milliseconds).
pub const AI_INITIAL_BACKOFF_MS: u64 = 1_000;

/// Backoff ceiling (milliseconds). 30 000 = 30 s.
pub const AI_MAX_BACKOFF_MS: u64 = 30_000;

/// Backend request timeout (seconds).
pub const AI_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Frequency Tracker
// ============================================================================

/// Sliding-window horizon (seconds).
pub const FREQ_WINDOW_SECS: u64 = 60;

/// Bucket width (seconds). 60 / 5 = 12 buckets per actor.
pub const FREQ_BUCKET_SECS: u64 = 5;

// ============================================================================
// Action Dispatcher
// ============================================================================

/// Rate limiter window for throttle outcomes (seconds).
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Tokens per actor per window.
pub const RATE_LIMIT_MAX: u32 = 5;
