//! Radio and logger-link trait seams.
//!
//! The protocol client and the fleet scanner are written against these
//! traits so the whole interaction engine runs under test with scripted
//! links. The production implementation over the system BLE stack lives in
//! [`super::btle`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::defaults::PASSIVE_SCAN_MIN_STACK_VERSION;
use crate::types::{GpsFix, MacAddr, RemoteFile};

// ============================================================================
// Errors
// ============================================================================

/// Transport-level failures. Any of these aborts the current session or
/// scan; the orchestrator counts them toward the retry ceiling.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("device {0} not found")]
    NotFound(MacAddr),
    #[error("connect to {mac} failed: {detail}")]
    Connect { mac: MacAddr, detail: String },
    #[error("command {cmd} failed: {detail}")]
    Command { cmd: &'static str, detail: String },
    #[error("command {cmd} timed out")]
    Timeout { cmd: &'static str },
    #[error("radio stack error: {0}")]
    Stack(String),
}

// ============================================================================
// Scanning
// ============================================================================

/// Scan mode, chosen once at process start.
///
/// Passive scanning reduces logger-side battery cost but needs a recent
/// platform radio stack; older stacks fall back to active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Active,
    Passive,
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanMode::Active => write!(f, "active"),
            ScanMode::Passive => write!(f, "passive"),
        }
    }
}

/// Parse a dotted stack version ("5.66") into (major, minor).
///
/// A plain string compare would misorder "5.100" against "5.65", so the
/// comparison is numeric.
pub fn parse_stack_version(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().ok()?;
    Some((major, minor))
}

/// Pick the scan mode from config preference and the reported stack version.
pub fn choose_scan_mode(passive_wanted: bool, stack_version: &str) -> ScanMode {
    if !passive_wanted {
        return ScanMode::Active;
    }
    match parse_stack_version(stack_version) {
        Some(v) if v >= PASSIVE_SCAN_MIN_STACK_VERSION => ScanMode::Passive,
        _ => ScanMode::Active,
    }
}

/// One advertisement observed during a scan.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub mac: MacAddr,
    pub name: String,
    pub rssi: Option<i16>,
}

// ============================================================================
// Radio
// ============================================================================

/// The exclusively-owned BLE radio. One per orchestrator process.
#[async_trait]
pub trait LoggerRadio: Send + Sync {
    /// Antenna/adapter identifier (e.g. "hci0"), for logs and console.
    fn antenna(&self) -> String;

    /// Reported platform radio-stack version string.
    fn stack_version(&self) -> String;

    /// Is the radio hardware responsive right now?
    async fn is_up(&self) -> bool;

    /// Run one scan, pushing every observed advertisement into `events`
    /// until `stop` is cancelled. Returns when the scan has been stopped
    /// or the stack reports a failure.
    async fn scan(
        &self,
        mode: ScanMode,
        events: mpsc::Sender<Advertisement>,
        stop: CancellationToken,
    ) -> Result<(), LinkError>;

    /// Open a connected link to one logger.
    async fn connect(&self, mac: &MacAddr) -> Result<Box<dyn LoggerLink>, LinkError>;

    /// Tear down any connection state for this address at the stack level.
    /// Used after aborted sessions instead of a graceful disconnect.
    async fn force_disconnect(&self, mac: &MacAddr);
}

// ============================================================================
// Logger link
// ============================================================================

/// Command surface of one connected logger.
///
/// Each call maps to one command/response exchange; the transport's own
/// response timeout surfaces as [`LinkError::Timeout`]. Sensor self-checks
/// distinguish "command answered, sensor bad" (`Ok(false)`) from transport
/// failure (`Err`).
#[async_trait]
pub trait LoggerLink: Send {
    async fn firmware_version(&mut self) -> Result<String, LinkError>;

    /// Current run-state string, e.g. "stopped".
    async fn status(&mut self) -> Result<String, LinkError>;

    /// Set the logger wall clock.
    async fn set_clock(&mut self, now: DateTime<Utc>) -> Result<(), LinkError>;

    /// Read the logger wall clock back.
    async fn read_clock(&mut self) -> Result<String, LinkError>;

    /// Seconds since the logger last reset.
    async fn uptime_secs(&mut self) -> Result<u64, LinkError>;

    /// Raw battery ADC counts.
    async fn battery_raw(&mut self) -> Result<u16, LinkError>;

    /// Is on-device debug logging currently enabled?
    async fn logging_enabled(&mut self) -> Result<bool, LinkError>;

    /// Flip on-device debug logging.
    async fn toggle_logging(&mut self) -> Result<(), LinkError>;

    /// Directory listing, in device order.
    async fn list_files(&mut self) -> Result<Vec<RemoteFile>, LinkError>;

    /// Arm the device-side transfer for one file.
    async fn prepare_download(&mut self, file: &RemoteFile) -> Result<(), LinkError>;

    /// Stream the armed file's bytes.
    async fn stream_file(&mut self, file: &RemoteFile) -> Result<Vec<u8>, LinkError>;

    /// Device-computed CRC-32 of a remote file.
    async fn remote_crc(&mut self, name: &str) -> Result<u32, LinkError>;

    /// Delete a remote file.
    async fn delete_file(&mut self, name: &str) -> Result<(), LinkError>;

    /// Temperature self-check; `Ok(false)` means the sensor failed the check.
    async fn temperature_self_check(&mut self) -> Result<bool, LinkError>;

    /// Pressure self-check; `Ok(false)` means the sensor failed the check.
    async fn pressure_self_check(&mut self) -> Result<bool, LinkError>;

    /// Switch the logger wake mode on or off.
    async fn set_wake(&mut self, enabled: bool) -> Result<(), LinkError>;

    /// Start a new recording run, stamped with the current deployment fix.
    async fn start_new_run(&mut self, fix: &GpsFix) -> Result<(), LinkError>;

    /// Factory reset command. The device drops the connection afterwards.
    async fn reset(&mut self) -> Result<(), LinkError>;

    /// Graceful disconnect.
    async fn disconnect(&mut self) -> Result<(), LinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_version_parses_dotted_pairs() {
        assert_eq!(parse_stack_version("5.66"), Some((5, 66)));
        assert_eq!(parse_stack_version("5.66.1"), Some((5, 66)));
        assert_eq!(parse_stack_version("6"), Some((6, 0)));
        assert_eq!(parse_stack_version("garbage"), None);
    }

    #[test]
    fn passive_requires_minimum_stack() {
        assert_eq!(choose_scan_mode(true, "5.66"), ScanMode::Passive);
        assert_eq!(choose_scan_mode(true, "5.65"), ScanMode::Passive);
        assert_eq!(choose_scan_mode(true, "5.64"), ScanMode::Active);
        assert_eq!(choose_scan_mode(true, "5.100"), ScanMode::Passive);
        assert_eq!(choose_scan_mode(false, "5.66"), ScanMode::Active);
        assert_eq!(choose_scan_mode(true, "unknown"), ScanMode::Active);
    }
}
