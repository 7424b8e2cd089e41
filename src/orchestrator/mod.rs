//! Download orchestrator — the repeating scan-and-download loop.
//!
//! Each pass gates BLE activity on operating conditions, runs one scan,
//! then drives the protocol client once per discovered candidate, strictly
//! sequentially — the radio is a singly-owned exclusive resource, so two
//! sessions never overlap. Outcomes feed the lockout registry, the retry
//! counters and the notification surface.

pub mod gates;

pub use gates::{evaluate_gates, FileFixSource, FixSource, GateOutcome};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ble::{FleetScanner, LoggerProtocolClient, LoggerRadio};
use crate::config::defaults::LOOP_PAUSE_SECS;
use crate::config::GatewayConfig;
use crate::notify::{NotificationKind, Notifier};
use crate::registry::{Flags, LockoutRegistry};
use crate::storage::{SessionHistory, SessionRecord};
use crate::types::{DownloadSession, GpsFix, LoggerIdentity, MacAddr, SessionError};

/// Loop tuning pulled out of the full config so tests can build an
/// orchestrator without a config file.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_retries: u32,
    pub scan_timeout: Duration,
    pub fix_max_age: Duration,
    pub speed_ceiling_knots: f64,
}

impl OrchestratorSettings {
    pub fn from_config(cfg: &GatewayConfig) -> Self {
        Self {
            max_retries: cfg.behavior.max_retries,
            scan_timeout: cfg.scan_timeout(),
            fix_max_age: Duration::from_secs(cfg.behavior.fix_max_age_secs),
            speed_ceiling_knots: cfg.behavior.speed_ceiling_knots,
        }
    }
}

/// What one pass did, for logs and tests.
#[derive(Debug)]
pub struct PassSummary {
    pub gate: GateOutcome,
    pub discovered: usize,
    pub sessions_run: usize,
}

/// Owns all state for the scan-and-download loop. Recreated fresh on every
/// supervisor restart; only the lockout markers, flag files and history DB
/// survive a crash.
pub struct DownloadOrchestrator {
    radio: Arc<dyn LoggerRadio>,
    fix_source: Arc<dyn FixSource>,
    scanner: FleetScanner,
    client: LoggerProtocolClient,
    lockouts: LockoutRegistry,
    flags: Flags,
    notifier: Notifier,
    history: SessionHistory,
    monitored: BTreeMap<MacAddr, LoggerIdentity>,
    retries: HashMap<MacAddr, u32>,
    settings: OrchestratorSettings,
    cancel: CancellationToken,
}

impl DownloadOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        radio: Arc<dyn LoggerRadio>,
        fix_source: Arc<dyn FixSource>,
        scanner: FleetScanner,
        client: LoggerProtocolClient,
        lockouts: LockoutRegistry,
        flags: Flags,
        notifier: Notifier,
        history: SessionHistory,
        monitored: BTreeMap<MacAddr, LoggerIdentity>,
        settings: OrchestratorSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            radio,
            fix_source,
            scanner,
            client,
            lockouts,
            flags,
            notifier,
            history,
            monitored,
            retries: HashMap::new(),
            settings,
            cancel,
        }
    }

    /// Run until cancelled.
    pub async fn run(&mut self) {
        info!(
            monitored = self.monitored.len(),
            antenna = %self.radio.antenna(),
            "orchestrator loop starting"
        );
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let summary = self.run_once().await;
            debug!(
                gate = %summary.gate,
                discovered = summary.discovered,
                sessions = summary.sessions_run,
                "pass complete"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(LOOP_PAUSE_SECS)) => {}
            }
        }
        info!("orchestrator loop stopped");
    }

    /// One pass: gates, override, scan, sequential downloads.
    pub async fn run_once(&mut self) -> PassSummary {
        let fix = self.fix_source.current_fix();
        let synced = self.fix_source.is_time_synced();
        let radio_up = self.radio.is_up().await;

        self.notifier.notify_alive(fix.as_ref());

        let gate = evaluate_gates(
            radio_up,
            fix,
            synced,
            Utc::now(),
            self.settings.fix_max_age,
            self.settings.speed_ceiling_knots,
        );
        let GateOutcome::Pass(fix) = gate.clone() else {
            debug!(gate = %gate, "BLE stage skipped this iteration");
            return PassSummary {
                gate,
                discovered: 0,
                sessions_run: 0,
            };
        };

        // Operator override clears every lockout before candidate selection.
        if self.flags.take_lockout_override() {
            self.lockouts.clear_all();
        }

        let locked_out: Vec<MacAddr> = self
            .monitored
            .keys()
            .filter(|mac| self.lockouts.is_locked_out(mac))
            .cloned()
            .collect();

        let found = self
            .scanner
            .discover(
                &self.monitored,
                &locked_out,
                &self.radio,
                self.settings.scan_timeout,
                Some(&fix),
            )
            .await;

        let mut sessions_run = 0;
        for (mac, type_tag) in &found {
            let Some(identity) = self.monitored.get(mac).cloned() else {
                continue;
            };
            info!(mac = %mac, tag = %type_tag, "starting logger interaction");
            let session = self.client.interact(&identity, &fix).await;
            sessions_run += 1;
            self.apply_outcome(session, &fix);
        }

        PassSummary {
            gate: GateOutcome::Pass(fix),
            discovered: found.len(),
            sessions_run,
        }
    }

    /// Apply one session result to lockouts, retry counters and notifications.
    pub fn apply_outcome(&mut self, session: DownloadSession, fix: &GpsFix) {
        let identity = session.identity.clone();
        let mac = identity.mac.clone();

        if session.is_success() {
            self.retries.remove(&mac);
            self.lockouts.clear(&mac);
            self.notifier.notify(
                NotificationKind::DownloadSuccess,
                Some(fix),
                Some(&identity),
                &format!("{} files", session.files_saved()),
            );
            if let Err(e) = self.history.store(&SessionRecord::from_session(&session)) {
                warn!(error = %e, "Could not persist session summary");
            }
            return;
        }

        if session.crit_error {
            // Hardware-sensor fault: straight to lockout, no retry budget.
            if let Err(e) = self.lockouts.lock(&mac) {
                warn!(error = %e, "Could not write lockout marker");
            }
            self.retries.remove(&mac);
            let kind = match session.error {
                Some(SessionError::TemperatureSensor) => {
                    NotificationKind::SensorTemperatureError
                }
                Some(SessionError::PressureSensor) => NotificationKind::SensorPressureError,
                _ => NotificationKind::RetriesExceeded,
            };
            self.notifier
                .notify(kind, Some(fix), Some(&identity), "locked out");
            return;
        }

        let attempts = {
            let counter = self.retries.entry(mac.clone()).or_insert(0);
            *counter += 1;
            *counter
        };
        if attempts >= self.settings.max_retries {
            self.retries.remove(&mac);
            if let Err(e) = self.lockouts.lock(&mac) {
                warn!(error = %e, "Could not write lockout marker");
            }
            self.notifier.notify(
                NotificationKind::RetriesExceeded,
                Some(fix),
                Some(&identity),
                "locked out",
            );
        } else {
            debug!(
                mac = %mac,
                attempts,
                ceiling = self.settings.max_retries,
                "failure below retry ceiling"
            );
        }
    }

    /// Current retry count for one logger (tests and diagnostics).
    pub fn retry_count(&self, mac: &MacAddr) -> u32 {
        self.retries.get(mac).copied().unwrap_or(0)
    }

    pub fn lockouts(&self) -> &LockoutRegistry {
        &self.lockouts
    }

    pub fn history(&self) -> &SessionHistory {
        &self.history
    }
}
