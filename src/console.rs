//! Loopback status channel to the operator console.
//!
//! Fire-and-forget UDP datagrams on localhost; the console process (out of
//! scope here) renders them. Delivery is best-effort — a missing console
//! must never slow down or fail the BLE loop, so every error is swallowed.

use std::net::UdpSocket;

use crate::config::defaults::CONSOLE_UDP_PORT;
use crate::types::MacAddr;

/// State tags the console understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleState {
    ScanFirstEver,
    Scan,
    LowBattery,
    HardwareError,
    TpSensorError,
    RunError,
    DownloadProgress,
}

impl ConsoleState {
    fn tag(self) -> &'static str {
        match self {
            ConsoleState::ScanFirstEver => "state_ble_scan_first_ever",
            ConsoleState::Scan => "state_ble_scan",
            ConsoleState::LowBattery => "state_ble_low_battery",
            ConsoleState::HardwareError => "state_ble_hardware_error",
            ConsoleState::TpSensorError => "state_ble_error_tp_sensor",
            ConsoleState::RunError => "state_ble_error_run",
            ConsoleState::DownloadProgress => "state_ble_download_progress",
        }
    }
}

fn send(payload: &str) {
    if let Ok(socket) = UdpSocket::bind("127.0.0.1:0") {
        let _ = socket.send_to(
            payload.as_bytes(),
            ("127.0.0.1", CONSOLE_UDP_PORT),
        );
    }
}

/// Paint a console state, optionally scoped to one logger.
pub fn tell(state: ConsoleState, mac: Option<&MacAddr>) {
    match mac {
        Some(m) => send(&format!("{}/{}", state.tag(), m)),
        None => send(state.tag()),
    }
}

/// Report transfer progress for the file currently streaming.
pub fn download_progress(mac: &MacAddr, received: u64, total: u64) {
    let pct = if total == 0 {
        100
    } else {
        (received.saturating_mul(100) / total).min(100)
    };
    send(&format!(
        "{}/{}/{}",
        ConsoleState::DownloadProgress.tag(),
        mac,
        pct
    ));
}
