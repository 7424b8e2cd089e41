//! Supervisor — crash-recovery parent for the orchestrator.
//!
//! Launches the orchestrator binary as a child process, blocks on its exit,
//! emits a rate-limited crash alarm on any non-clean exit, and restarts the
//! child unconditionally after a fixed cooldown. No backoff growth and no
//! retry ceiling: on a vessel, availability beats the risk of a crash loop.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rand::Rng;
use tracing::{error, info, warn};

use crate::config::defaults::{CHILD_RESTART_COOLDOWN_SECS, CRASH_ALARM_PERIOD_SECS};
use crate::notify::{NotificationKind, Notifier};

/// Restart-loop parent for the orchestrator child process.
pub struct Supervisor {
    child_program: PathBuf,
    child_args: Vec<String>,
    cooldown: Duration,
    stamp_path: PathBuf,
    notifier: Notifier,
}

impl Supervisor {
    pub fn new(
        child_program: PathBuf,
        child_args: Vec<String>,
        stamp_path: PathBuf,
        notifier: Notifier,
    ) -> Self {
        Self {
            child_program,
            child_args,
            cooldown: Duration::from_secs(CHILD_RESTART_COOLDOWN_SECS),
            stamp_path,
            notifier,
        }
    }

    #[cfg(test)]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Restart loop. Runs until `stop` is raised (tests, signal handlers);
    /// in production it runs for the life of the box.
    pub fn run(&self, stop: &AtomicBool) {
        info!(child = %self.child_program.display(), "supervisor started");
        while !stop.load(Ordering::Relaxed) {
            info!("supervisor launching child");
            match self.spawn_and_wait() {
                Ok(code) => {
                    info!(exit_code = code, "supervisor waited child");
                    self.handle_exit(code);
                }
                Err(e) => {
                    // Spawning itself failed — same recovery path as a crash.
                    error!(error = %e, "could not launch child");
                    self.handle_exit(-1);
                }
            }
            // Fixed cooldown, sliced so a stop request stays responsive.
            let mut slept = Duration::ZERO;
            while slept < self.cooldown && !stop.load(Ordering::Relaxed) {
                let slice = Duration::from_millis(200).min(self.cooldown - slept);
                std::thread::sleep(slice);
                slept += slice;
            }
        }
        info!("supervisor stopped");
    }

    /// Launch the child and block until it exits.
    pub fn spawn_and_wait(&self) -> Result<i32> {
        let mut child = Command::new(&self.child_program)
            .args(&self.child_args)
            .spawn()
            .with_context(|| format!("spawning {}", self.child_program.display()))?;
        let status = child.wait().context("waiting on child")?;
        Ok(status.code().unwrap_or(-1))
    }

    /// Apply the exit-code policy: code 0 is the only clean signal.
    pub fn handle_exit(&self, code: i32) {
        if code == 0 {
            return;
        }
        self.alarm_crash(code);
    }

    /// Emit the crash alarm, at most once per rate-limit period. The stamp
    /// is a file so the limit survives supervisor restarts.
    fn alarm_crash(&self, code: i32) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let last: u64 = std::fs::read_to_string(&self.stamp_path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);
        if now.saturating_sub(last) < CRASH_ALARM_PERIOD_SECS {
            warn!(exit_code = code, "crash alarm suppressed (rate limit)");
            return;
        }
        if let Err(e) = std::fs::write(&self.stamp_path, now.to_string()) {
            warn!(error = %e, "could not write crash-alarm stamp");
        }

        let addr = local_ipv4()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let extra = format!(
            "exit_code={} addr={} id={}",
            code,
            addr,
            correlation_id()
        );
        self.notifier
            .notify(NotificationKind::CrashAlarm, None, None, &extra);
    }
}

/// Detect the local IPv4 address by briefly connecting a UDP socket.
///
/// No data is sent — the OS just selects the source address it would use
/// for the given destination.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) => Some(ip),
        IpAddr::V6(_) => None,
    }
}

/// Short hex id tying an alarm to its log lines.
fn correlation_id() -> String {
    let mut rng = rand::thread_rng();
    format!("{:08x}", rng.gen::<u32>())
}
