//! Fleet scanner — one scan pass over the radio, filtered to candidates.
//!
//! Every observed advertisement is recorded for diagnostics; a device is
//! short-listed only when its advertised name matches a supported logger
//! family, its address is in the monitored set, and it is not locked out.
//! Latency beats completeness: the pass ends the moment the first relevant
//! device shows up.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::defaults::{
    CROWDED_SCAN_DEVICE_COUNT, CROWDED_SCAN_NOTE_PERIOD_SECS, HW_ERROR_NOTIFY_PERIOD_SECS,
    HW_ERROR_PAUSE_SECS,
};
use crate::console::{self, ConsoleState};
use crate::notify::{NotificationKind, Notifier, TimeCache};
use crate::types::{DiscoveredDevice, GpsFix, LoggerType, MacAddr};

use super::link::{LoggerRadio, ScanMode};

/// Scans for monitored loggers and returns ranked candidates.
pub struct FleetScanner {
    mode: ScanMode,
    notifier: Notifier,
    time_cache: Arc<TimeCache>,
    first_scan_done: AtomicBool,
}

impl FleetScanner {
    /// `mode` is chosen once at process start (see
    /// [`super::link::choose_scan_mode`]) and kept for the process lifetime.
    pub fn new(mode: ScanMode, notifier: Notifier, time_cache: Arc<TimeCache>) -> Self {
        info!("BLE scan mode {}", mode);
        Self {
            mode,
            notifier,
            time_cache,
            first_scan_done: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// One scan pass.
    ///
    /// Returns discovered candidates as `mac -> advertised type tag`. On
    /// transport/hardware failure the result is empty, a rate-limited
    /// radio-hardware notification goes out, and the pass pauses so any
    /// status surface can refresh.
    pub async fn discover(
        &self,
        monitored: &BTreeMap<MacAddr, crate::types::LoggerIdentity>,
        locked_out: &[MacAddr],
        radio: &Arc<dyn LoggerRadio>,
        timeout: Duration,
        fix: Option<&GpsFix>,
    ) -> BTreeMap<MacAddr, String> {
        self.scan_banner(fix);

        let (tx, mut rx) = mpsc::channel(64);
        let stop = CancellationToken::new();
        let scan_stop = stop.clone();
        let scan_radio = Arc::clone(radio);
        let mode = self.mode;
        let scan_task = tokio::spawn(async move {
            scan_radio.scan(mode, tx, scan_stop).await
        });

        let mut observed: BTreeMap<MacAddr, DiscoveredDevice> = BTreeMap::new();
        let mut candidates: BTreeMap<MacAddr, String> = BTreeMap::new();
        let deadline = Instant::now() + timeout;

        loop {
            tokio::select! {
                maybe_adv = rx.recv() => {
                    match maybe_adv {
                        Some(adv) => {
                            debug!(mac = %adv.mac, name = %adv.name, rssi = ?adv.rssi, "advertisement");
                            observed.insert(
                                adv.mac.clone(),
                                DiscoveredDevice {
                                    mac: adv.mac.clone(),
                                    type_tag: adv.name.clone(),
                                    rssi: adv.rssi,
                                },
                            );
                            if LoggerType::from_advertised_name(&adv.name).is_none() {
                                continue;
                            }
                            if !monitored.contains_key(&adv.mac) || locked_out.contains(&adv.mac) {
                                continue;
                            }
                            // First relevant hit ends the pass — starting
                            // the download beats finishing the census.
                            candidates.insert(adv.mac.clone(), adv.name);
                            break;
                        }
                        // Scan task dropped its sender: hardware gave up.
                        None => break,
                    }
                }
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        stop.cancel();
        // Release the receiver so a sender blocked on a full channel can't
        // keep the scan task from winding down.
        drop(rx);
        let scan_result = scan_task.await;

        match scan_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.report_hardware_error(&e.to_string(), fix).await;
                return BTreeMap::new();
            }
            Err(join_err) => {
                self.report_hardware_error(&join_err.to_string(), fix).await;
                return BTreeMap::new();
            }
        }

        if observed.len() > CROWDED_SCAN_DEVICE_COUNT
            && self.time_cache.is_it_time_to(
                "crowded_ble_environment",
                Duration::from_secs(CROWDED_SCAN_NOTE_PERIOD_SECS),
            )
        {
            info!(observed = observed.len(), "crowded BLE environment");
        }

        debug!(
            observed = observed.len(),
            candidates = candidates.len(),
            "scan pass complete"
        );
        candidates
    }

    fn scan_banner(&self, fix: Option<&GpsFix>) {
        if !self.first_scan_done.swap(true, Ordering::Relaxed) {
            console::tell(ConsoleState::ScanFirstEver, None);
        }
        console::tell(ConsoleState::Scan, None);
        self.notifier.notify_scan_started(fix);
    }

    async fn report_hardware_error(&self, detail: &str, fix: Option<&GpsFix>) {
        if self.time_cache.is_it_time_to(
            "ble_hw_error",
            Duration::from_secs(HW_ERROR_NOTIFY_PERIOD_SECS),
        ) {
            warn!(detail, "hardware error during scan");
            self.notifier
                .notify(NotificationKind::RadioHardwareError, fix, None, detail);
        }
        console::tell(ConsoleState::HardwareError, None);
        // wait some time so any status surface can display this
        tokio::time::sleep(Duration::from_secs(HW_ERROR_PAUSE_SECS)).await;
    }
}
