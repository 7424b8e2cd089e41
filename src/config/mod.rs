//! Gateway Configuration Module
//!
//! Per-deployment configuration loaded from TOML, covering vessel identity,
//! the monitored logger fleet, and the operating limits that gate BLE work.
//!
//! ## Loading Order
//!
//! 1. `DECKHAND_CONFIG` environment variable (path to TOML file)
//! 2. `deckhand.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! // In main():
//! config::init(GatewayConfig::load());
//!
//! // Anywhere in the codebase:
//! let ceiling = config::get().behavior.speed_ceiling_knots;
//! ```

mod gateway_config;
pub mod defaults;

pub use gateway_config::*;

use std::sync::OnceLock;

/// Global gateway configuration, initialized once at startup.
static GATEWAY_CONFIG: OnceLock<GatewayConfig> = OnceLock::new();

/// Initialize the global gateway configuration.
///
/// Must be called exactly once before any calls to `get()`.
pub fn init(config: GatewayConfig) {
    if GATEWAY_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once — ignoring");
    }
}

/// Get a reference to the global gateway configuration.
///
/// Panics if `init()` has not been called. This is by design — a missing
/// config is a fatal startup error, not a recoverable condition.
pub fn get() -> &'static GatewayConfig {
    GATEWAY_CONFIG
        .get()
        .expect("config::get() called before config::init() — this is a startup bug")
}

/// Check whether the config has been initialized.
///
/// Useful for tests and optional config paths.
pub fn is_initialized() -> bool {
    GATEWAY_CONFIG.get().is_some()
}
