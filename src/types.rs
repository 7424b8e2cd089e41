//! Core domain types: logger identities, scan results, download sessions.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Logger identity
// ============================================================================

/// Supported logger families, keyed by the type tag they advertise.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LoggerType {
    Do2,
    Do1,
    Moana,
    Mat2W,
    Matp2W,
    Tdo,
    Tap1,
}

impl LoggerType {
    /// All supported types, in advertisement-match order.
    pub const ALL: [LoggerType; 7] = [
        LoggerType::Do2,
        LoggerType::Do1,
        LoggerType::Moana,
        LoggerType::Mat2W,
        LoggerType::Matp2W,
        LoggerType::Tdo,
        LoggerType::Tap1,
    ];

    /// The tag embedded in this family's advertised name.
    pub fn tag(&self) -> &'static str {
        match self {
            LoggerType::Do2 => "DO-2",
            LoggerType::Do1 => "DO-1",
            LoggerType::Moana => "MOANA",
            LoggerType::Mat2W => "MAT-2W",
            LoggerType::Matp2W => "MATP-2W",
            LoggerType::Tdo => "TDO",
            LoggerType::Tap1 => "TAP1",
        }
    }

    /// Match an advertised device name against the supported families.
    ///
    /// Names carry vendor prefixes (e.g. `ZT-MOANA-0051`), so this is a
    /// containment check, not an equality check.
    pub fn from_advertised_name(name: &str) -> Option<LoggerType> {
        Self::ALL.iter().copied().find(|t| name.contains(t.tag()))
    }

    /// Parse a config-file type string (same form as the tag).
    pub fn from_config_str(s: &str) -> Option<LoggerType> {
        Self::ALL.iter().copied().find(|t| t.tag() == s)
    }
}

impl fmt::Display for LoggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Normalized 6-byte BLE address in lower-case colon form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MacAddr(String);

impl MacAddr {
    /// Normalize and validate an address string.
    ///
    /// Accepts `AA:BB:CC:DD:EE:FF` or `aa-bb-cc-dd-ee-ff`; stores the
    /// canonical lower-case colon form.
    pub fn parse(s: &str) -> Option<MacAddr> {
        let norm = s.trim().to_lowercase().replace('-', ":");
        let parts: Vec<&str> = norm.split(':').collect();
        if parts.len() != 6 {
            return None;
        }
        for p in &parts {
            if p.len() != 2 || !p.chars().all(|c| c.is_ascii_hexdigit()) {
                return None;
            }
        }
        Some(MacAddr(norm))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe form (colons replaced with dashes), used for
    /// per-device folders and marker files.
    pub fn folder_form(&self) -> String {
        self.0.replace(':', "-")
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One monitored logger, resolved from configuration. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggerIdentity {
    pub mac: MacAddr,
    pub serial_number: String,
    pub kind: LoggerType,
}

// ============================================================================
// Scan results
// ============================================================================

/// A device observed during one scan pass. Created fresh each scan,
/// discarded after candidate selection.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub mac: MacAddr,
    pub type_tag: String,
    pub rssi: Option<i16>,
}

// ============================================================================
// Remote files
// ============================================================================

/// One entry from the logger's directory listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    pub size: u64,
}

/// Outcome of one file in the session's download loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadedFile {
    pub file: RemoteFile,
    /// Final saved path; `None` when the CRC check rejected the transfer.
    pub local_path: Option<PathBuf>,
    pub crc_ok: bool,
}

// ============================================================================
// Download session
// ============================================================================

/// Error tag carried by a session that hit a non-fatal or fatal condition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionError {
    /// Temperature self-check failed.
    TemperatureSensor,
    /// Pressure self-check failed.
    PressureSensor,
    /// A must-succeed protocol step failed; the tag names the step.
    Step(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::TemperatureSensor => write!(f, "T_sensor_error"),
            SessionError::PressureSensor => write!(f, "P_sensor_error"),
            SessionError::Step(step) => write!(f, "error {}", step),
        }
    }
}

/// Result of one full interaction with one logger.
///
/// Fully populated on a clean run, partially populated on an early abort.
/// The connection is always released before this is handed upward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSession {
    pub identity: LoggerIdentity,
    pub started_at: DateTime<Utc>,
    pub firmware: Option<String>,
    pub battery_raw: Option<u16>,
    pub battery_mv: Option<f64>,
    pub temperature_ok: bool,
    pub pressure_ok: bool,
    /// Files processed, in listing order.
    pub downloaded: Vec<DownloadedFile>,
    pub rerun_armed: bool,
    pub error: Option<SessionError>,
    pub crit_error: bool,
    /// True iff every must-succeed step completed.
    pub completed: bool,
}

impl DownloadSession {
    pub fn new(identity: LoggerIdentity) -> Self {
        Self {
            identity,
            started_at: Utc::now(),
            firmware: None,
            battery_raw: None,
            battery_mv: None,
            temperature_ok: true,
            pressure_ok: true,
            downloaded: Vec::new(),
            rerun_armed: false,
            error: None,
            crit_error: false,
            completed: false,
        }
    }

    /// A session the orchestrator treats as a clean success.
    pub fn is_success(&self) -> bool {
        self.completed && !self.crit_error
    }

    /// Count of files that landed on local disk with a good CRC.
    pub fn files_saved(&self) -> usize {
        self.downloaded.iter().filter(|d| d.crc_ok).count()
    }
}

// ============================================================================
// GPS fix
// ============================================================================

/// A positioned, timestamped speed reading from the external fix source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GpsFix {
    pub lat: f64,
    pub lon: f64,
    pub timestamp: DateTime<Utc>,
    pub speed_knots: f64,
}

impl GpsFix {
    /// Position formatted the way notifications carry it.
    pub fn position_string(&self) -> String {
        format!("{:.4}, {:.4}", self.lat, self.lon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_normalizes_case_and_separators() {
        let m = MacAddr::parse("AA:BB:CC:DD:EE:01").unwrap();
        assert_eq!(m.as_str(), "aa:bb:cc:dd:ee:01");
        let m2 = MacAddr::parse("aa-bb-cc-dd-ee-01").unwrap();
        assert_eq!(m, m2);
        assert_eq!(m.folder_form(), "aa-bb-cc-dd-ee-01");
    }

    #[test]
    fn mac_rejects_malformed_addresses() {
        assert!(MacAddr::parse("aa:bb:cc:dd:ee").is_none());
        assert!(MacAddr::parse("aa:bb:cc:dd:ee:fg").is_none());
        assert!(MacAddr::parse("aabbccddeeff").is_none());
        assert!(MacAddr::parse("aa:bb:cc:dd:ee:0011").is_none());
    }

    #[test]
    fn advertised_name_matches_supported_types() {
        assert_eq!(
            LoggerType::from_advertised_name("ZT-MOANA-0051"),
            Some(LoggerType::Moana)
        );
        assert_eq!(LoggerType::from_advertised_name("TDO-1234"), Some(LoggerType::Tdo));
        assert_eq!(LoggerType::from_advertised_name("FitBand X"), None);
    }

    #[test]
    fn session_success_requires_completed_without_crit() {
        let id = LoggerIdentity {
            mac: MacAddr::parse("aa:bb:cc:dd:ee:01").unwrap(),
            serial_number: "1234567".into(),
            kind: LoggerType::Tdo,
        };
        let mut s = DownloadSession::new(id);
        assert!(!s.is_success());
        s.completed = true;
        assert!(s.is_success());
        s.crit_error = true;
        assert!(!s.is_success());
    }

    #[test]
    fn session_error_tags_match_wire_form() {
        assert_eq!(SessionError::TemperatureSensor.to_string(), "T_sensor_error");
        assert_eq!(SessionError::PressureSensor.to_string(), "P_sensor_error");
        assert_eq!(SessionError::Step("gfv".into()).to_string(), "error gfv");
    }
}
