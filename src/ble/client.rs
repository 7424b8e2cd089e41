//! Logger protocol engine.
//!
//! One [`LoggerProtocolClient::interact`] call runs the full command
//! sequence against one connected logger: authenticate the link, sync the
//! clock, read battery and sensor health, list and download remote files
//! with CRC checking, delete processed files, and conditionally re-arm the
//! logger for its next run. Stateless between sessions.
//!
//! Failure discipline: every step marked must-succeed aborts the session on
//! error with a force-disconnect by address; sensor self-check failures and
//! CRC mismatches are recorded and the loop continues; a start-new-run
//! failure aborts the remaining file loop.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::artifacts;
use crate::config::defaults::{
    BATTERY_SCALE_FACTOR, LOW_BATTERY_ADC_FLOOR, LOW_BATTERY_PAUSE_SECS,
    RERUN_ERROR_PAUSE_SECS, SENSOR_ERROR_PAUSE_SECS, TEST_MODE_FILE_PREFIX, WAKE_SETTLE_SECS,
};
use crate::config::GearType;
use crate::console::{self, ConsoleState};
use crate::notify::{NotificationKind, Notifier};
use crate::paths::DataDirs;
use crate::registry::Flags;
use crate::types::{
    DownloadSession, DownloadedFile, GpsFix, LoggerIdentity, RemoteFile, SessionError,
};

use super::link::{LinkError, LoggerLink, LoggerRadio};

/// Why a session stopped before the protocol ran to completion.
#[derive(Debug)]
enum SessionAbort {
    /// The needs-reset signature tripped; a reset command was issued and the
    /// session ended there. Required recovery, not a protocol failure.
    ResetIssued,
    /// A must-succeed step failed.
    Step {
        step: &'static str,
        detail: String,
    },
}

impl SessionAbort {
    fn step(step: &'static str, source: LinkError) -> Self {
        SessionAbort::Step {
            step,
            detail: source.to_string(),
        }
    }

    fn local(step: &'static str, source: std::io::Error) -> Self {
        SessionAbort::Step {
            step,
            detail: source.to_string(),
        }
    }
}

/// Executes the per-logger interaction protocol. Stateless between sessions;
/// cheap to construct once per orchestrator.
pub struct LoggerProtocolClient {
    radio: std::sync::Arc<dyn LoggerRadio>,
    dirs: DataDirs,
    flags: Flags,
    notifier: Notifier,
    gear_type: GearType,
    dev_platform: bool,
}

impl LoggerProtocolClient {
    pub fn new(
        radio: std::sync::Arc<dyn LoggerRadio>,
        dirs: DataDirs,
        flags: Flags,
        notifier: Notifier,
        gear_type: GearType,
        dev_platform: bool,
    ) -> Self {
        Self {
            radio,
            dirs,
            flags,
            notifier,
            gear_type,
            dev_platform,
        }
    }

    /// Run one full interaction. Always returns a session; `completed` is
    /// true only when every must-succeed step finished. The connection is
    /// released (gracefully or by force) before this returns.
    pub async fn interact(&self, identity: &LoggerIdentity, fix: &GpsFix) -> DownloadSession {
        let mut session = DownloadSession::new(identity.clone());

        let mut link = match self.radio.connect(&identity.mac).await {
            Ok(link) => link,
            Err(e) => {
                warn!(mac = %identity.mac, error = %e, "Connect failed");
                session.error = Some(SessionError::Step("connect".to_string()));
                self.radio.force_disconnect(&identity.mac).await;
                return session;
            }
        };
        info!(mac = %identity.mac, "connected");

        match self
            .run_session(link.as_mut(), identity, fix, &mut session)
            .await
        {
            Ok(()) => {
                if let Err(e) = link.disconnect().await {
                    warn!(mac = %identity.mac, error = %e, "Graceful disconnect failed");
                    self.radio.force_disconnect(&identity.mac).await;
                }
                session.completed = true;
            }
            Err(SessionAbort::ResetIssued) => {
                info!(mac = %identity.mac, "Reset issued — session ended for recovery");
                self.radio.force_disconnect(&identity.mac).await;
            }
            Err(SessionAbort::Step { step, detail }) => {
                warn!(mac = %identity.mac, step, detail = %detail, "Session aborted");
                if session.error.is_none() {
                    session.error = Some(SessionError::Step(step.to_string()));
                }
                self.radio.force_disconnect(&identity.mac).await;
            }
        }

        session
    }

    async fn run_session(
        &self,
        link: &mut dyn LoggerLink,
        identity: &LoggerIdentity,
        fix: &GpsFix,
        session: &mut DownloadSession,
    ) -> Result<(), SessionAbort> {
        let mac = &identity.mac;

        // Recovery check runs before any protocol traffic.
        if self.flags.take_needs_reset(mac) {
            link.reset()
                .await
                .map_err(|e| SessionAbort::step("rst", e))?;
            return Err(SessionAbort::ResetIssued);
        }

        let firmware = link
            .firmware_version()
            .await
            .map_err(|e| SessionAbort::step("gfv", e))?;
        info!("GFV | {}", firmware);
        session.firmware = Some(firmware);

        let state = link
            .status()
            .await
            .map_err(|e| SessionAbort::step("sts", e))?;
        info!("STS | logger was {}", state);

        link.set_clock(chrono::Utc::now())
            .await
            .map_err(|e| SessionAbort::step("sws", e))?;
        info!("SWS | OK");

        let uptime = link
            .uptime_secs()
            .await
            .map_err(|e| SessionAbort::step("utm", e))?;
        info!("UTM | {}", uptime);

        let raw = link
            .battery_raw()
            .await
            .map_err(|e| SessionAbort::step("bat", e))?;
        let mv = f64::from(raw) / BATTERY_SCALE_FACTOR;
        info!("BAT | ADC {} -> {:.0} mV", raw, mv);
        session.battery_raw = Some(raw);
        session.battery_mv = Some(mv);
        if raw < LOW_BATTERY_ADC_FLOOR {
            self.notifier.notify(
                NotificationKind::LowBattery,
                Some(fix),
                Some(identity),
                &format!("{} counts", raw),
            );
            console::tell(ConsoleState::LowBattery, Some(mac));
            // give the console time to display
            sleep(Duration::from_secs(LOW_BATTERY_PAUSE_SECS)).await;
        }

        let clock = link
            .read_clock()
            .await
            .map_err(|e| SessionAbort::step("gtm", e))?;
        debug!("GTM | {}", clock);

        link.set_clock(chrono::Utc::now())
            .await
            .map_err(|e| SessionAbort::step("stm", e))?;
        debug!("STM | OK");

        // Gateway platforms run loggers dark to save power; dev platforms
        // keep on-device logging for bring-up.
        let logging_on = link
            .logging_enabled()
            .await
            .map_err(|e| SessionAbort::step("log", e))?;
        if logging_on != self.dev_platform {
            link.toggle_logging()
                .await
                .map_err(|e| SessionAbort::step("log", e))?;
        }

        let listing = link
            .list_files()
            .await
            .map_err(|e| SessionAbort::step("dir", e))?;
        info!("DIR | {} entries", listing.len());

        for file in listing {
            self.process_file(link, identity, fix, file, session).await?;
        }

        Ok(())
    }

    async fn process_file(
        &self,
        link: &mut dyn LoggerLink,
        identity: &LoggerIdentity,
        fix: &GpsFix,
        file: RemoteFile,
        session: &mut DownloadSession,
    ) -> Result<(), SessionAbort> {
        let mac = &identity.mac;

        // Zero-byte files are junk; delete remotely, nothing lands locally.
        if file.size == 0 {
            link.delete_file(&file.name)
                .await
                .map_err(|e| SessionAbort::step("del", e))?;
            debug!("deleted empty remote file {}", file.name);
            return Ok(());
        }

        info!("downloading file {} ({} bytes)", file.name, file.size);
        link.prepare_download(&file)
            .await
            .map_err(|e| SessionAbort::step("dwg", e))?;
        let data = link
            .stream_file(&file)
            .await
            .map_err(|e| SessionAbort::step("dwl", e))?;

        // Stage, checksum, then either promote or discard.
        let staging = self.dirs.crc_staging_file();
        std::fs::write(&staging, &data).map_err(|e| SessionAbort::local("stage", e))?;
        let local_crc = crc32fast::hash(&data);
        let remote_crc = link
            .remote_crc(&file.name)
            .await
            .map_err(|e| SessionAbort::step("crc", e))?;

        if local_crc == remote_crc {
            let mut save_name = file.name.clone();
            if self.flags.download_test_mode() {
                save_name = format!("{}{}", TEST_MODE_FILE_PREFIX, save_name);
            }
            let folder = self
                .dirs
                .download_folder(mac)
                .map_err(|e| SessionAbort::local("mkdir", e))?;
            let final_path = folder.join(&save_name);
            if std::fs::rename(&staging, &final_path).is_err() {
                std::fs::copy(&staging, &final_path)
                    .map_err(|e| SessionAbort::local("save", e))?;
                let _ = std::fs::remove_file(&staging);
            }
            info!("downloaded file {}", save_name);

            link.delete_file(&file.name)
                .await
                .map_err(|e| SessionAbort::step("del", e))?;
            info!("deleted remote file {}", file.name);

            artifacts::write_download_metadata(&final_path, identity, file.size, fix)
                .map_err(|e| SessionAbort::local("meta", e))?;
            if self.gear_type == GearType::Fixed {
                artifacts::write_fixed_gear_metric(&final_path, identity, fix)
                    .map_err(|e| SessionAbort::local("gpq", e))?;
            }

            session.downloaded.push(DownloadedFile {
                file,
                local_path: Some(final_path),
                crc_ok: true,
            });
        } else {
            warn!(
                "bad CRC for {} (local {:08x}, remote {:08x}) — discarding staged copy",
                file.name, local_crc, remote_crc
            );
            let _ = std::fs::remove_file(&staging);
            // Remote copy stays so the next session can retry the transfer.
            session.downloaded.push(DownloadedFile {
                file,
                local_path: None,
                crc_ok: false,
            });
        }

        // Sensor self-checks. A bad sensor is flagged and escalated but
        // never stops the session.
        let t_ok = link
            .temperature_self_check()
            .await
            .map_err(|e| SessionAbort::step("gst", e))?;
        if !t_ok {
            warn!("GST | temperature self-check failed");
            session.temperature_ok = false;
            session.error = Some(SessionError::TemperatureSensor);
            session.crit_error = true;
            self.notifier.notify(
                NotificationKind::SensorTemperatureError,
                Some(fix),
                Some(identity),
                "",
            );
            console::tell(ConsoleState::TpSensorError, Some(mac));
            sleep(Duration::from_secs(SENSOR_ERROR_PAUSE_SECS)).await;
        }

        let p_ok = link
            .pressure_self_check()
            .await
            .map_err(|e| SessionAbort::step("gsp", e))?;
        if !p_ok {
            warn!("GSP | pressure self-check failed");
            session.pressure_ok = false;
            session.error = Some(SessionError::PressureSensor);
            session.crit_error = true;
            self.notifier.notify(
                NotificationKind::SensorPressureError,
                Some(fix),
                Some(identity),
                "",
            );
            console::tell(ConsoleState::TpSensorError, Some(mac));
            sleep(Duration::from_secs(SENSOR_ERROR_PAUSE_SECS)).await;
        }

        // Re-arm unless the deployment persisted a do-not-rerun override.
        let rerun = !self.flags.do_not_rerun();
        link.set_wake(rerun)
            .await
            .map_err(|e| SessionAbort::step("wak", e))?;
        sleep(Duration::from_secs(WAKE_SETTLE_SECS)).await;

        session.rerun_armed = rerun;
        if rerun {
            if let Err(e) = link.start_new_run(fix).await {
                self.notifier.notify(
                    NotificationKind::RerunFailure,
                    Some(fix),
                    Some(identity),
                    "",
                );
                console::tell(ConsoleState::RunError, Some(mac));
                sleep(Duration::from_secs(RERUN_ERROR_PAUSE_SECS)).await;
                session.rerun_armed = false;
                return Err(SessionAbort::step("rws", e));
            }
            info!("RWS | OK");
        } else {
            warn!("logger is not set for auto-re-run");
        }

        Ok(())
    }
}
