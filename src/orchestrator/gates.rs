//! Operating-condition gates for the BLE stage.
//!
//! Radio work only happens when the hardware answers, the clock has been
//! synchronized against a fresh GPS fix, and the vessel is slow enough to
//! be idle or docked — a vessel at operating speed is working its gear, not
//! waiting for downloads.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::types::GpsFix;

/// External GPS/time collaborator, consumed through a narrow interface.
pub trait FixSource: Send + Sync {
    /// Most recent fix, if any has ever been acquired.
    fn current_fix(&self) -> Option<GpsFix>;

    /// Has the system clock ever been synchronized from GPS time?
    fn is_time_synced(&self) -> bool;
}

/// Fix source backed by the files the GPS service maintains.
pub struct FileFixSource {
    fix_path: PathBuf,
    sync_stamp: PathBuf,
}

/// Where the external GPS service publishes the last fix.
pub const DEFAULT_FIX_PATH: &str = "/tmp/gps_last.json";
/// Present once the GPS service has stepped the system clock.
pub const DEFAULT_SYNC_STAMP: &str = "/tmp/gps_time_synced.flag";

#[derive(Deserialize)]
struct FixFile {
    lat: f64,
    lon: f64,
    timestamp: DateTime<Utc>,
    speed_knots: f64,
}

impl FileFixSource {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(fix_path: P, sync_stamp: Q) -> Self {
        Self {
            fix_path: fix_path.into(),
            sync_stamp: sync_stamp.into(),
        }
    }

    pub fn with_default_paths() -> Self {
        Self::new(DEFAULT_FIX_PATH, DEFAULT_SYNC_STAMP)
    }
}

impl FixSource for FileFixSource {
    fn current_fix(&self) -> Option<GpsFix> {
        let bytes = std::fs::read(&self.fix_path).ok()?;
        let parsed: FixFile = serde_json::from_slice(&bytes).ok()?;
        Some(GpsFix {
            lat: parsed.lat,
            lon: parsed.lon,
            timestamp: parsed.timestamp,
            speed_knots: parsed.speed_knots,
        })
    }

    fn is_time_synced(&self) -> bool {
        self.sync_stamp.exists()
    }
}

// ============================================================================
// Gate evaluation
// ============================================================================

/// Why (or whether) the BLE stage may run this iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// All gates passed; the contained fix stamps this pass.
    Pass(GpsFix),
    RadioDown,
    NoFix,
    StaleFix { age_secs: i64 },
    ClockNotSynced,
    TooFast { speed_knots: f64 },
}

impl GateOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, GateOutcome::Pass(_))
    }
}

impl std::fmt::Display for GateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateOutcome::Pass(_) => write!(f, "pass"),
            GateOutcome::RadioDown => write!(f, "radio hardware not responsive"),
            GateOutcome::NoFix => write!(f, "no GPS fix yet"),
            GateOutcome::StaleFix { age_secs } => write!(f, "GPS fix is {}s old", age_secs),
            GateOutcome::ClockNotSynced => write!(f, "clock never synchronized"),
            GateOutcome::TooFast { speed_knots } => {
                write!(f, "vessel moving at {:.1} knots", speed_knots)
            }
        }
    }
}

/// Evaluate every gate. Pure so it can be tested without hardware.
pub fn evaluate_gates(
    radio_up: bool,
    fix: Option<GpsFix>,
    time_synced: bool,
    now: DateTime<Utc>,
    fix_max_age: Duration,
    speed_ceiling_knots: f64,
) -> GateOutcome {
    if !radio_up {
        return GateOutcome::RadioDown;
    }
    let Some(fix) = fix else {
        return GateOutcome::NoFix;
    };
    let age = now.signed_duration_since(fix.timestamp);
    if age.num_seconds() > fix_max_age.as_secs() as i64 {
        return GateOutcome::StaleFix {
            age_secs: age.num_seconds(),
        };
    }
    if !time_synced {
        return GateOutcome::ClockNotSynced;
    }
    if fix.speed_knots > speed_ceiling_knots {
        return GateOutcome::TooFast {
            speed_knots: fix.speed_knots,
        };
    }
    debug!(speed = fix.speed_knots, "all gates passed");
    GateOutcome::Pass(fix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(speed: f64, age_secs: i64) -> GpsFix {
        GpsFix {
            lat: -41.0,
            lon: 174.0,
            timestamp: Utc::now() - chrono::Duration::seconds(age_secs),
            speed_knots: speed,
        }
    }

    fn gates(radio_up: bool, f: Option<GpsFix>, synced: bool) -> GateOutcome {
        evaluate_gates(
            radio_up,
            f,
            synced,
            Utc::now(),
            Duration::from_secs(120),
            2.0,
        )
    }

    #[test]
    fn all_gates_pass_when_idle_with_fresh_fix() {
        assert!(gates(true, Some(fix(0.5, 10)), true).passed());
    }

    #[test]
    fn radio_down_blocks() {
        assert_eq!(gates(false, Some(fix(0.5, 10)), true), GateOutcome::RadioDown);
    }

    #[test]
    fn missing_fix_blocks() {
        assert_eq!(gates(true, None, true), GateOutcome::NoFix);
    }

    #[test]
    fn stale_fix_blocks() {
        assert!(matches!(
            gates(true, Some(fix(0.5, 500)), true),
            GateOutcome::StaleFix { .. }
        ));
    }

    #[test]
    fn unsynced_clock_blocks() {
        assert_eq!(gates(true, Some(fix(0.5, 10)), false), GateOutcome::ClockNotSynced);
    }

    #[test]
    fn operating_speed_blocks() {
        // Above the ceiling the vessel is working, not idling.
        assert!(matches!(
            gates(true, Some(fix(6.3, 10)), true),
            GateOutcome::TooFast { .. }
        ));
    }

    #[test]
    fn file_fix_source_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let fix_path = tmp.path().join("gps_last.json");
        let stamp = tmp.path().join("synced.flag");
        let source = FileFixSource::new(&fix_path, &stamp);

        assert!(source.current_fix().is_none());
        assert!(!source.is_time_synced());

        std::fs::write(
            &fix_path,
            serde_json::json!({
                "lat": -41.2865,
                "lon": 174.7762,
                "timestamp": Utc::now(),
                "speed_knots": 0.3,
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(&stamp, "").unwrap();

        let f = source.current_fix().unwrap();
        assert!((f.lat - -41.2865).abs() < 1e-9);
        assert!(source.is_time_synced());
    }
}
