//! Asynchronous notification surface.
//!
//! Everything the gateway wants an operator (or shore side) to eventually
//! see goes through [`Notifier::notify`]: a typed record serialized to a JSON
//! file in the outbox directory. A background worker (see [`worker`]) drains
//! the outbox through the pluggable transport, so emitting a notification is
//! always a cheap local write — the BLE loop never waits on a slow uplink.

pub mod rate_limit;
pub mod worker;

pub use rate_limit::TimeCache;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::defaults;
use crate::config::VesselInfo;
use crate::paths::DataDirs;
use crate::types::{GpsFix, LoggerIdentity};

// ============================================================================
// Kinds
// ============================================================================

/// Every notification kind the gateway emits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Boot,
    Alive,
    ScanStarted,
    LowBattery,
    SensorTemperatureError,
    SensorPressureError,
    RerunFailure,
    DownloadSuccess,
    RadioHardwareError,
    RetriesExceeded,
    CrashAlarm,
}

impl NotificationKind {
    /// Human-readable reason line carried in the serialized record.
    pub fn reason(&self) -> &'static str {
        match self {
            NotificationKind::Boot => "gateway just booted",
            NotificationKind::Alive => "gateway is alive",
            NotificationKind::ScanStarted => "gateway started a logger scan",
            NotificationKind::LowBattery => "check battery in logger",
            NotificationKind::SensorTemperatureError => "check temperature sensor in logger",
            NotificationKind::SensorPressureError => "check pressure sensor in logger",
            NotificationKind::RerunFailure => "logger could not start a new run",
            NotificationKind::DownloadSuccess => "logger download OK",
            NotificationKind::RadioHardwareError => "gateway had a Bluetooth error",
            NotificationKind::RetriesExceeded => "too many bad download attempts on logger",
            NotificationKind::CrashAlarm => "gateway just crashed, or at least restarted",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason())
    }
}

// ============================================================================
// Payload
// ============================================================================

/// One serialized notification, self-describing enough for any transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub reason: String,
    pub time_utc_epoch: i64,
    pub time_utc_str: String,
    pub time_local_str: String,
    pub vessel_name: String,
    pub box_serial: String,
    pub project: String,
    pub position: String,
    pub speed: String,
    pub logger_mac: String,
    pub logger_sn: String,
    pub logger_type: String,
    pub extra: String,
}

// ============================================================================
// Notifier
// ============================================================================

/// Writes notifications into the outbox. Cheap to clone; share freely.
#[derive(Clone)]
pub struct Notifier {
    outbox: PathBuf,
    vessel: VesselInfo,
    time_cache: Arc<TimeCache>,
}

impl Notifier {
    pub fn new(dirs: &DataDirs, vessel: VesselInfo, time_cache: Arc<TimeCache>) -> Self {
        Self {
            outbox: dirs.outbox(),
            vessel,
            time_cache,
        }
    }

    /// Emit a notification. Never blocks on the transport; failures to write
    /// the outbox file are logged and swallowed — a full disk must not take
    /// down the download loop.
    pub fn notify(
        &self,
        kind: NotificationKind,
        fix: Option<&GpsFix>,
        logger: Option<&LoggerIdentity>,
        extra: &str,
    ) {
        let now_utc = Utc::now();
        let n = Notification {
            kind,
            reason: kind.reason().to_string(),
            time_utc_epoch: now_utc.timestamp(),
            time_utc_str: now_utc.format("%Y-%m-%d %H:%M:%S").to_string(),
            time_local_str: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            vessel_name: self.vessel.name.clone(),
            box_serial: self.vessel.box_serial.clone(),
            project: self.vessel.project.clone(),
            position: fix.map(GpsFix::position_string).unwrap_or_default(),
            speed: fix
                .map(|g| format!("{:.2} knots", g.speed_knots))
                .unwrap_or_default(),
            logger_mac: logger.map(|l| l.mac.to_string()).unwrap_or_default(),
            logger_sn: logger.map(|l| l.serial_number.clone()).unwrap_or_default(),
            logger_type: logger.map(|l| l.kind.to_string()).unwrap_or_default(),
            extra: extra.to_string(),
        };

        let ns = now_utc.timestamp_nanos_opt().unwrap_or_else(|| now_utc.timestamp() * 1_000_000_000);
        let path = self.outbox.join(format!("{}.json", ns));
        match serde_json::to_vec_pretty(&n) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&path, bytes) {
                    warn!(path = %path.display(), error = %e, "Could not write notification to outbox");
                } else {
                    debug!(kind = ?kind, path = %path.display(), "Notification queued");
                    if n.logger_mac.is_empty() {
                        tracing::info!("{} at {}", n.reason, n.position);
                    } else {
                        tracing::info!(
                            "{} for logger {} ({}) at {}",
                            n.reason, n.logger_sn, n.logger_mac, n.position
                        );
                    }
                }
            }
            Err(e) => warn!(error = %e, "Could not serialize notification"),
        }
    }

    /// Alive ping, limited to one per 12 hours.
    pub fn notify_alive(&self, fix: Option<&GpsFix>) {
        if self.time_cache.is_it_time_to(
            "notify_alive",
            std::time::Duration::from_secs(defaults::ALIVE_NOTIFY_PERIOD_SECS),
        ) {
            self.notify(NotificationKind::Alive, fix, None, "");
        }
    }

    /// Scan-started marker, limited so a tight loop cannot flood the outbox.
    pub fn notify_scan_started(&self, fix: Option<&GpsFix>) {
        if self.time_cache.is_it_time_to(
            "notify_scan_started",
            std::time::Duration::from_secs(defaults::SCAN_STARTED_NOTIFY_PERIOD_SECS),
        ) {
            self.notify(NotificationKind::ScanStarted, fix, None, "");
        }
    }
}
