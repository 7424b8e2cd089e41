//! Fleet scanner candidate selection and lockout filtering.

mod common;

use std::fs::File;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use common::*;
use deckhand::ble::{FleetScanner, LoggerRadio, ScanMode};
use deckhand::notify::NotificationKind;
use deckhand::registry::LockoutRegistry;
use deckhand::types::MacAddr;

const SCAN_TIMEOUT: Duration = Duration::from_secs(6);
const COOLDOWN: Duration = Duration::from_secs(600);

fn scanner_for(env: &TestEnv) -> FleetScanner {
    FleetScanner::new(
        ScanMode::Active,
        env.notifier.clone(),
        Arc::clone(&env.time_cache),
    )
}

fn backdate(path: &std::path::Path, age: Duration) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}

#[tokio::test(start_paused = true)]
async fn monitored_logger_is_discovered() {
    let tmp = tempfile::tempdir().unwrap();
    let env = test_env(tmp.path());
    let radio = Arc::new(MockRadio::new());
    radio.advertise(&mac1(), "TDO-2305778");

    let monitored = monitored_with(&identity1());
    let scanner = scanner_for(&env);
    let radio_dyn: Arc<dyn LoggerRadio> = radio.clone();
    let found = scanner
        .discover(&monitored, &[], &radio_dyn, SCAN_TIMEOUT, None)
        .await;

    assert_eq!(found.len(), 1);
    assert_eq!(found[&mac1()], "TDO-2305778");
}

#[tokio::test(start_paused = true)]
async fn unsupported_and_unmonitored_devices_are_filtered() {
    let tmp = tempfile::tempdir().unwrap();
    let env = test_env(tmp.path());
    let radio = Arc::new(MockRadio::new());
    // Supported name but not monitored.
    let stranger = MacAddr::parse("11:22:33:44:55:66").unwrap();
    radio.advertise(&stranger, "TDO-9999999");
    // Monitored mac would match, but this advertisement is a phone.
    radio.advertise(&mac1(), "FitBand X");

    let monitored = monitored_with(&identity1());
    let scanner = scanner_for(&env);
    let radio_dyn: Arc<dyn LoggerRadio> = radio.clone();
    let found = scanner
        .discover(&monitored, &[], &radio_dyn, SCAN_TIMEOUT, None)
        .await;

    assert!(found.is_empty());
}

#[tokio::test(start_paused = true)]
async fn locked_out_mac_is_excluded_until_cooldown_elapses() {
    let tmp = tempfile::tempdir().unwrap();
    let env = test_env(tmp.path());
    let lockouts = LockoutRegistry::open(env.dirs.lockout_dir(), COOLDOWN).unwrap();
    lockouts.lock(&mac1()).unwrap();

    let radio = Arc::new(MockRadio::new());
    radio.advertise(&mac1(), "TDO-2305778");
    let monitored = monitored_with(&identity1());
    let scanner = scanner_for(&env);
    let radio_dyn: Arc<dyn LoggerRadio> = radio.clone();

    // Live lockout: never offered as a candidate.
    let locked: Vec<MacAddr> = monitored
        .keys()
        .filter(|m| lockouts.is_locked_out(m))
        .cloned()
        .collect();
    assert_eq!(locked, vec![mac1()]);
    let found = scanner
        .discover(&monitored, &locked, &radio_dyn, SCAN_TIMEOUT, None)
        .await;
    assert!(found.is_empty());

    // The instant the cooldown elapses the mac is a candidate again.
    let marker = env.dirs.lockout_dir().join(mac1().folder_form());
    backdate(&marker, COOLDOWN + Duration::from_secs(1));
    let locked: Vec<MacAddr> = monitored
        .keys()
        .filter(|m| lockouts.is_locked_out(m))
        .cloned()
        .collect();
    assert!(locked.is_empty());
    let found = scanner
        .discover(&monitored, &locked, &radio_dyn, SCAN_TIMEOUT, None)
        .await;
    assert_eq!(found.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn override_clear_makes_mac_candidate_immediately() {
    let tmp = tempfile::tempdir().unwrap();
    let env = test_env(tmp.path());
    let lockouts = LockoutRegistry::open(env.dirs.lockout_dir(), COOLDOWN).unwrap();
    lockouts.lock(&mac1()).unwrap();
    assert!(lockouts.is_locked_out(&mac1()));

    // Operator override bypasses the remaining cooldown.
    lockouts.clear_all();
    assert!(!lockouts.is_locked_out(&mac1()));
}

#[tokio::test(start_paused = true)]
async fn hardware_failure_yields_empty_result_and_rate_limited_alarm() {
    let tmp = tempfile::tempdir().unwrap();
    let env = test_env(tmp.path());
    let mut radio = MockRadio::new();
    radio.scan_fail = true;
    radio.advertise(&mac1(), "TDO-2305778");
    let radio = Arc::new(radio);

    let monitored = monitored_with(&identity1());
    let scanner = scanner_for(&env);
    let radio_dyn: Arc<dyn LoggerRadio> = radio.clone();

    let found = scanner
        .discover(&monitored, &[], &radio_dyn, SCAN_TIMEOUT, None)
        .await;
    assert!(found.is_empty());

    // Second failure right away: notification suppressed by the time cache.
    let found = scanner
        .discover(&monitored, &[], &radio_dyn, SCAN_TIMEOUT, None)
        .await;
    assert!(found.is_empty());

    let hw_alarms = outbox_kinds(&env.dirs)
        .into_iter()
        .filter(|k| *k == NotificationKind::RadioHardwareError)
        .count();
    assert_eq!(hw_alarms, 1);
}

#[tokio::test(start_paused = true)]
async fn empty_airwaves_returns_after_timeout() {
    let tmp = tempfile::tempdir().unwrap();
    let env = test_env(tmp.path());
    let radio = Arc::new(MockRadio::new());

    let monitored = monitored_with(&identity1());
    let scanner = scanner_for(&env);
    let radio_dyn: Arc<dyn LoggerRadio> = radio.clone();
    let found = scanner
        .discover(&monitored, &[], &radio_dyn, SCAN_TIMEOUT, None)
        .await;

    assert!(found.is_empty());
    assert_eq!(radio.scan_count(), 1);
}
