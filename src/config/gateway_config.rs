//! Gateway configuration — vessel identity, monitored fleet, operating limits.
//!
//! Every operational knob lives here as a TOML field with a default matching
//! the deployed behavior, so a missing or partial file never changes what the
//! gateway does out of the box.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::defaults;
use crate::types::{LoggerIdentity, LoggerType, MacAddr};

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one vessel deployment.
///
/// Load with `GatewayConfig::load()` which searches:
/// 1. `$DECKHAND_CONFIG` env var
/// 2. `./deckhand.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    /// Vessel / gateway box identification
    #[serde(default)]
    pub vessel: VesselInfo,

    /// Monitored logger fleet
    #[serde(default)]
    pub fleet: FleetConfig,

    /// Operating limits and retry policy
    #[serde(default)]
    pub behavior: BehaviorConfig,

    /// Deployment gear mode
    #[serde(default)]
    pub gear: GearConfig,

    /// Filesystem layout
    #[serde(default)]
    pub paths: PathsConfig,
}

impl GatewayConfig {
    /// Load configuration using the standard search order.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("DECKHAND_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), vessel = %config.vessel.name, "Loaded gateway config from DECKHAND_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from DECKHAND_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "DECKHAND_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from("deckhand.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(vessel = %config.vessel.name, "Loaded gateway config from ./deckhand.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./deckhand.toml, using defaults");
                }
            }
        }

        info!("No deckhand.toml found — using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;
        let config: GatewayConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configs that cannot identify their own fleet.
    fn validate(&self) -> Result<(), ConfigError> {
        for entry in &self.fleet.loggers {
            if MacAddr::parse(&entry.mac).is_none() {
                return Err(ConfigError::BadMac(entry.mac.clone()));
            }
            if LoggerType::from_config_str(&entry.kind).is_none() {
                return Err(ConfigError::BadLoggerType(entry.kind.clone()));
            }
        }
        Ok(())
    }

    /// The monitored fleet as resolved identities, keyed by normalized mac.
    ///
    /// Entries that fail to parse are skipped (load-time validation already
    /// rejected them for file-based configs; this guards hand-built configs
    /// in tests).
    pub fn monitored_identities(&self) -> BTreeMap<MacAddr, LoggerIdentity> {
        self.fleet
            .loggers
            .iter()
            .filter_map(|entry| {
                let mac = MacAddr::parse(&entry.mac)?;
                let kind = LoggerType::from_config_str(&entry.kind)?;
                Some((
                    mac.clone(),
                    LoggerIdentity {
                        mac,
                        serial_number: entry.serial.clone(),
                        kind,
                    },
                ))
            })
            .collect()
    }

    /// Lockout cooldown with the minimum floor enforced.
    pub fn forget_time(&self) -> Duration {
        Duration::from_secs(
            self.behavior
                .forget_time_secs
                .max(defaults::MIN_FORGET_TIME_SECS),
        )
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.behavior.scan_timeout_secs)
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Vessel and gateway box identity carried in every notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VesselInfo {
    pub name: String,
    pub box_serial: String,
    pub project: String,
}

impl Default for VesselInfo {
    fn default() -> Self {
        Self {
            name: "unnamed-vessel".to_string(),
            box_serial: String::new(),
            project: String::new(),
        }
    }
}

/// One monitored logger in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerEntry {
    /// BLE address, any common separator form.
    pub mac: String,
    /// Device serial number.
    pub serial: String,
    /// Logger family tag, e.g. `"TDO"` or `"MOANA"`.
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FleetConfig {
    #[serde(default)]
    pub loggers: Vec<LoggerEntry>,
}

/// Operating limits, retry policy and platform switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Lockout cooldown basis (seconds); floored at 600.
    pub forget_time_secs: u64,
    /// Non-fatal failures tolerated per logger before a lockout.
    pub max_retries: u32,
    /// BLE activity is gated off above this vessel speed (knots).
    pub speed_ceiling_knots: f64,
    /// GPS fixes older than this fail the freshness gate (seconds).
    pub fix_max_age_secs: u64,
    /// Scan window per orchestrator pass (seconds).
    pub scan_timeout_secs: u64,
    /// Prefer passive scanning when the radio stack supports it.
    pub passive_scan: bool,
    /// Development platform: keep on-device logging enabled instead of
    /// disabling it for power savings.
    pub dev_platform: bool,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            forget_time_secs: defaults::DEFAULT_FORGET_TIME_SECS,
            max_retries: defaults::DEFAULT_MAX_RETRIES,
            speed_ceiling_knots: defaults::DEFAULT_SPEED_CEILING_KNOTS,
            fix_max_age_secs: defaults::DEFAULT_FIX_MAX_AGE_SECS,
            scan_timeout_secs: defaults::SCAN_TIMEOUT_SECS,
            passive_scan: false,
            dev_platform: false,
        }
    }
}

/// Deployment gear mode; fixed gear produces an extra metric artifact per
/// download.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GearType {
    #[default]
    Mobile,
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GearConfig {
    #[serde(default)]
    pub gear_type: GearType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of everything the gateway persists.
    pub data_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {0}: {1}")]
    Io(PathBuf, String),
    #[error("failed to parse config {0}: {1}")]
    Parse(PathBuf, String),
    #[error("invalid logger mac in config: {0}")]
    BadMac(String),
    #[error("unknown logger type in config: {0}")]
    BadLoggerType(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.behavior.max_retries, 3);
        assert!(cfg.monitored_identities().is_empty());
        assert_eq!(cfg.gear.gear_type, GearType::Mobile);
    }

    #[test]
    fn forget_time_floor_enforced() {
        let mut cfg = GatewayConfig::default();
        cfg.behavior.forget_time_secs = 30;
        assert_eq!(cfg.forget_time(), Duration::from_secs(600));
        cfg.behavior.forget_time_secs = 7200;
        assert_eq!(cfg.forget_time(), Duration::from_secs(7200));
    }

    #[test]
    fn parses_full_toml() {
        let toml_src = r#"
            [vessel]
            name = "FV Petrel"
            box_serial = "DH-0042"
            project = "coastal-do"

            [[fleet.loggers]]
            mac = "AA:BB:CC:DD:EE:01"
            serial = "1805501"
            kind = "TDO"

            [behavior]
            forget_time_secs = 1800
            max_retries = 2
            speed_ceiling_knots = 1.5
            fix_max_age_secs = 90
            scan_timeout_secs = 8
            passive_scan = true
            dev_platform = false

            [gear]
            gear_type = "fixed"

            [paths]
            data_dir = "/var/lib/deckhand"
        "#;
        let cfg: GatewayConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(cfg.vessel.name, "FV Petrel");
        let fleet = cfg.monitored_identities();
        assert_eq!(fleet.len(), 1);
        let mac = MacAddr::parse("aa:bb:cc:dd:ee:01").unwrap();
        assert_eq!(fleet[&mac].kind, LoggerType::Tdo);
        assert_eq!(cfg.gear.gear_type, GearType::Fixed);
        assert_eq!(cfg.behavior.scan_timeout_secs, 8);
    }

    #[test]
    fn rejects_bad_fleet_entries() {
        let toml_src = r#"
            [[fleet.loggers]]
            mac = "not-a-mac"
            serial = "1"
            kind = "TDO"
        "#;
        let cfg: GatewayConfig = toml::from_str(toml_src).unwrap();
        assert!(cfg.validate().is_err());
    }
}
