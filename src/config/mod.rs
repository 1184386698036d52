//! Gatekeeper Configuration Module
//!
//! Provides deployment configuration loaded from a TOML file with
//! environment-variable overrides (environment wins).
//!
//! ## Loading Order
//!
//! 1. `RISKGATE_CONFIG` environment variable (path to TOML file)
//! 2. `riskgate.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! // In main():
//! config::init(GatekeeperConfig::load()?);
//!
//! // Anywhere in the codebase:
//! let ttl = config::get().cache.ttl_seconds;
//! ```
//!
//! Stage constructors also take the config by value so tests can build
//! components without touching the global.

pub mod defaults;
mod settings;

pub use settings::*;

use std::sync::OnceLock;

/// Global gatekeeper configuration, initialized once at startup.
static GATEKEEPER_CONFIG: OnceLock<GatekeeperConfig> = OnceLock::new();

/// Initialize the global configuration.
///
/// Must be called exactly once before any calls to `get()`.
pub fn init(config: GatekeeperConfig) {
    if GATEKEEPER_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once — ignoring");
    }
}

/// Get a reference to the global configuration.
///
/// Panics if `init()` has not been called. This is by design — a missing
/// config is a fatal startup error, not a recoverable condition.
pub fn get() -> &'static GatekeeperConfig {
    GATEKEEPER_CONFIG
        .get()
        .expect("config::get() called before config::init() — this is a startup bug")
}

/// Check whether the config has been initialized.
///
/// Useful for tests and optional config paths.
pub fn is_initialized() -> bool {
    GATEKEEPER_CONFIG.get().is_some()
}
