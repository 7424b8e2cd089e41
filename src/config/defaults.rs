//! System-wide default constants.
//!
//! Centralises magic numbers that would otherwise scatter across the
//! protocol client, scanner, orchestrator and supervisor. Grouped by
//! subsystem for easy discovery.

// ============================================================================
// Logger protocol
// ============================================================================

/// Battery ADC-to-millivolt scale factor for TDO-class loggers.
///
/// Millivolts = raw ADC counts / this factor.
pub const BATTERY_SCALE_FACTOR: f64 = 0.5454;

/// Raw ADC count below which a low-battery advisory is emitted.
pub const LOW_BATTERY_ADC_FLOOR: u16 = 982;

/// Pause after a low-battery advisory so the console can surface it (seconds).
pub const LOW_BATTERY_PAUSE_SECS: u64 = 3;

/// Pause after a sensor self-check failure (seconds).
pub const SENSOR_ERROR_PAUSE_SECS: u64 = 5;

/// Pause after a start-new-run failure (seconds).
pub const RERUN_ERROR_PAUSE_SECS: u64 = 5;

/// Settle time after switching the logger wake mode (seconds).
pub const WAKE_SETTLE_SECS: u64 = 1;

/// Per-command response timeout on the BLE link (seconds).
pub const COMMAND_TIMEOUT_SECS: u64 = 10;

/// Prefix applied to saved filenames when download test mode is active.
pub const TEST_MODE_FILE_PREFIX: &str = "testfile_";

// ============================================================================
// Scanning
// ============================================================================

/// Default BLE scan window (seconds).
pub const SCAN_TIMEOUT_SECS: u64 = 6;

/// Radio-hardware-error notifications are limited to one per this period.
pub const HW_ERROR_NOTIFY_PERIOD_SECS: u64 = 600;

/// Pause after a scan hardware error so any status surface can refresh (seconds).
pub const HW_ERROR_PAUSE_SECS: u64 = 5;

/// Observed-device count above which the radio environment counts as crowded.
pub const CROWDED_SCAN_DEVICE_COUNT: usize = 15;

/// Crowded-environment diagnostics are limited to one per this period.
pub const CROWDED_SCAN_NOTE_PERIOD_SECS: u64 = 6 * 3600;

/// Scan-started notifications are limited to one per this period.
pub const SCAN_STARTED_NOTIFY_PERIOD_SECS: u64 = 3600;

/// Minimum platform stack version (major, minor) for passive scanning.
pub const PASSIVE_SCAN_MIN_STACK_VERSION: (u32, u32) = (5, 65);

// ============================================================================
// Orchestrator
// ============================================================================

/// Floor enforced on the configured lockout cooldown (seconds).
pub const MIN_FORGET_TIME_SECS: u64 = 600;

/// Default lockout cooldown when the config does not set one (seconds).
pub const DEFAULT_FORGET_TIME_SECS: u64 = 3600;

/// Default per-logger failure count before a lockout is applied.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default vessel speed ceiling for BLE activity (knots).
pub const DEFAULT_SPEED_CEILING_KNOTS: f64 = 2.0;

/// Default maximum age of a GPS fix before the gate fails (seconds).
pub const DEFAULT_FIX_MAX_AGE_SECS: u64 = 120;

/// Pause between orchestrator passes (seconds).
pub const LOOP_PAUSE_SECS: u64 = 10;

/// Alive notifications are limited to one per this period.
pub const ALIVE_NOTIFY_PERIOD_SECS: u64 = 12 * 3600;

// ============================================================================
// Supervisor
// ============================================================================

/// Cooldown before the supervisor restarts a dead child (seconds).
pub const CHILD_RESTART_COOLDOWN_SECS: u64 = 5;

/// Crash alarms are limited to one per this period (seconds).
pub const CRASH_ALARM_PERIOD_SECS: u64 = 3600;

// ============================================================================
// Console
// ============================================================================

/// Loopback UDP port the operator console listens on.
pub const CONSOLE_UDP_PORT: u16 = 12349;

// ============================================================================
// Outbox
// ============================================================================

/// Poll interval for the notification outbox worker (seconds).
pub const OUTBOX_POLL_SECS: u64 = 30;
