//! Production radio over the system BLE stack.
//!
//! Loggers expose a UART-style GATT service: commands are short ASCII frames
//! written to the TX characteristic, responses arrive as notifications on
//! the RX characteristic in the form `TAG NN<payload>` where `NN` is the
//! payload length in hex. File streaming reuses the RX characteristic with
//! raw chunks.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use chrono::{DateTime, Utc};
use futures::stream::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::defaults::COMMAND_TIMEOUT_SECS;
use crate::console;
use crate::types::{GpsFix, MacAddr, RemoteFile};

use super::link::{Advertisement, LinkError, LoggerLink, LoggerRadio, ScanMode};

/// Logger UART service.
pub const LOGGER_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_5000_0000_1000_8000_0080_5f9b_34fb);
/// Commands written by the gateway.
pub const LOGGER_TX_UUID: Uuid = Uuid::from_u128(0x0000_5001_0000_1000_8000_0080_5f9b_34fb);
/// Responses and file chunks notified by the logger.
pub const LOGGER_RX_UUID: Uuid = Uuid::from_u128(0x0000_5002_0000_1000_8000_0080_5f9b_34fb);

/// End-of-listing marker in directory responses.
const DIR_TERMINATOR: u8 = 0x04;

// ============================================================================
// Radio
// ============================================================================

/// The one BLE adapter this process owns.
pub struct BtleRadio {
    adapter: Adapter,
    antenna: String,
    stack_version: String,
}

impl BtleRadio {
    /// Open the first available adapter.
    pub async fn open() -> Result<Self, LinkError> {
        let manager = Manager::new()
            .await
            .map_err(|e| LinkError::Stack(e.to_string()))?;
        let adapters = manager
            .adapters()
            .await
            .map_err(|e| LinkError::Stack(e.to_string()))?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| LinkError::Stack("no BLE adapter present".to_string()))?;
        let antenna = adapter
            .adapter_info()
            .await
            .unwrap_or_else(|_| "hci0".to_string());
        let stack_version = read_stack_version();
        info!(antenna = %antenna, stack = %stack_version, "BLE adapter opened");
        Ok(Self {
            adapter,
            antenna,
            stack_version,
        })
    }

    async fn peripheral_by_mac(&self, mac: &MacAddr) -> Result<Peripheral, LinkError> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| LinkError::Stack(e.to_string()))?;
        for p in peripherals {
            if let Ok(Some(props)) = p.properties().await {
                if let Some(seen) = MacAddr::parse(&props.address.to_string()) {
                    if &seen == mac {
                        return Ok(p);
                    }
                }
            }
        }
        Err(LinkError::NotFound(mac.clone()))
    }
}

/// Platform stack version, best-effort; an unparseable answer just forces
/// active scanning.
fn read_stack_version() -> String {
    match std::process::Command::new("bluetoothctl")
        .arg("--version")
        .output()
    {
        Ok(out) => {
            let text = String::from_utf8_lossy(&out.stdout);
            // "bluetoothctl: 5.66" on current stacks
            text.split_whitespace()
                .last()
                .unwrap_or("0.0")
                .to_string()
        }
        Err(e) => {
            warn!(error = %e, "Could not read stack version");
            "0.0".to_string()
        }
    }
}

#[async_trait]
impl LoggerRadio for BtleRadio {
    fn antenna(&self) -> String {
        self.antenna.clone()
    }

    fn stack_version(&self) -> String {
        self.stack_version.clone()
    }

    async fn is_up(&self) -> bool {
        self.adapter.adapter_info().await.is_ok()
    }

    async fn scan(
        &self,
        mode: ScanMode,
        events: mpsc::Sender<Advertisement>,
        stop: CancellationToken,
    ) -> Result<(), LinkError> {
        // The PHY-level scan mode belongs to the platform stack; passive
        // deployments additionally narrow the filter to the logger service
        // so unrelated traffic never reaches us.
        let filter = match mode {
            ScanMode::Passive => ScanFilter {
                services: vec![LOGGER_SERVICE_UUID],
            },
            ScanMode::Active => ScanFilter::default(),
        };

        let mut central_events = self
            .adapter
            .events()
            .await
            .map_err(|e| LinkError::Stack(e.to_string()))?;
        self.adapter
            .start_scan(filter)
            .await
            .map_err(|e| LinkError::Stack(e.to_string()))?;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                event = central_events.next() => {
                    let id = match event {
                        Some(CentralEvent::DeviceDiscovered(id))
                        | Some(CentralEvent::DeviceUpdated(id)) => id,
                        Some(_) => continue,
                        None => break,
                    };
                    let Ok(peripheral) = self.adapter.peripheral(&id).await else {
                        continue;
                    };
                    let Ok(Some(props)) = peripheral.properties().await else {
                        continue;
                    };
                    let Some(mac) = MacAddr::parse(&props.address.to_string()) else {
                        continue;
                    };
                    let adv = Advertisement {
                        mac,
                        name: props.local_name.unwrap_or_default(),
                        rssi: props.rssi,
                    };
                    if events.send(adv).await.is_err() {
                        // Receiver done (early exit) — stop scanning.
                        break;
                    }
                }
            }
        }

        if let Err(e) = self.adapter.stop_scan().await {
            warn!(error = %e, "stop_scan failed");
        }
        Ok(())
    }

    async fn connect(&self, mac: &MacAddr) -> Result<Box<dyn LoggerLink>, LinkError> {
        let peripheral = self.peripheral_by_mac(mac).await?;
        peripheral.connect().await.map_err(|e| LinkError::Connect {
            mac: mac.clone(),
            detail: e.to_string(),
        })?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| LinkError::Connect {
                mac: mac.clone(),
                detail: e.to_string(),
            })?;

        let chars = peripheral.characteristics();
        let tx = chars
            .iter()
            .find(|c| c.uuid == LOGGER_TX_UUID)
            .cloned()
            .ok_or_else(|| LinkError::Connect {
                mac: mac.clone(),
                detail: "TX characteristic missing".to_string(),
            })?;
        let rx = chars
            .iter()
            .find(|c| c.uuid == LOGGER_RX_UUID)
            .cloned()
            .ok_or_else(|| LinkError::Connect {
                mac: mac.clone(),
                detail: "RX characteristic missing".to_string(),
            })?;

        peripheral
            .subscribe(&rx)
            .await
            .map_err(|e| LinkError::Connect {
                mac: mac.clone(),
                detail: e.to_string(),
            })?;
        let notifications = peripheral
            .notifications()
            .await
            .map_err(|e| LinkError::Connect {
                mac: mac.clone(),
                detail: e.to_string(),
            })?;

        Ok(Box::new(BtleLink {
            peripheral,
            tx,
            frames: Box::pin(notifications.map(|n| n.value)),
            cmd_timeout: Duration::from_secs(COMMAND_TIMEOUT_SECS),
            mac: mac.clone(),
        }))
    }

    async fn force_disconnect(&self, mac: &MacAddr) {
        match self.peripheral_by_mac(mac).await {
            Ok(p) => {
                if let Err(e) = p.disconnect().await {
                    debug!(mac = %mac, error = %e, "force disconnect");
                }
            }
            Err(_) => debug!(mac = %mac, "force disconnect: peripheral not present"),
        }
    }
}

// ============================================================================
// Link
// ============================================================================

/// One connected logger over GATT.
pub struct BtleLink {
    peripheral: Peripheral,
    tx: Characteristic,
    frames: Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>,
    cmd_timeout: Duration,
    mac: MacAddr,
}

impl BtleLink {
    async fn write_frame(&mut self, cmd: &'static str, frame: &str) -> Result<(), LinkError> {
        self.peripheral
            .write(&self.tx, frame.as_bytes(), WriteType::WithResponse)
            .await
            .map_err(|e| LinkError::Command {
                cmd,
                detail: e.to_string(),
            })
    }

    async fn next_frame(&mut self, cmd: &'static str) -> Result<Vec<u8>, LinkError> {
        match timeout(self.cmd_timeout, self.frames.next()).await {
            Ok(Some(bytes)) => Ok(bytes),
            Ok(None) => Err(LinkError::Command {
                cmd,
                detail: "link closed".to_string(),
            }),
            Err(_) => Err(LinkError::Timeout { cmd }),
        }
    }

    /// One command/response exchange. Responses look like `TAG NN<payload>`
    /// with `NN` the payload length in hex.
    async fn command(&mut self, cmd: &'static str, arg: Option<&str>) -> Result<String, LinkError> {
        let frame = match arg {
            Some(a) => format!("{} {}", cmd, a),
            None => cmd.to_string(),
        };
        self.write_frame(cmd, &frame).await?;
        let resp = self.next_frame(cmd).await?;
        parse_response(cmd, &resp)
    }
}

/// Parse a `TAG NN<payload>` response frame.
fn parse_response(cmd: &'static str, frame: &[u8]) -> Result<String, LinkError> {
    let text = String::from_utf8_lossy(frame);
    let rest = text.strip_prefix(cmd).ok_or_else(|| LinkError::Command {
        cmd,
        detail: format!("unexpected response: {}", text),
    })?;
    let rest = rest.strip_prefix(' ').unwrap_or(rest);
    if rest.len() < 2 {
        return Err(LinkError::Command {
            cmd,
            detail: format!("short response: {}", text),
        });
    }
    let (len_hex, payload) = rest.split_at(2);
    let expected = usize::from_str_radix(len_hex, 16).map_err(|_| LinkError::Command {
        cmd,
        detail: format!("bad length field: {}", text),
    })?;
    if payload.len() != expected {
        return Err(LinkError::Command {
            cmd,
            detail: format!("length mismatch ({} != {})", payload.len(), expected),
        });
    }
    Ok(payload.to_string())
}

#[async_trait]
impl LoggerLink for BtleLink {
    async fn firmware_version(&mut self) -> Result<String, LinkError> {
        self.command("GFV", None).await
    }

    async fn status(&mut self) -> Result<String, LinkError> {
        let code = self.command("STS", None).await?;
        Ok(match code.as_str() {
            "00" => "stopped".to_string(),
            "01" => "running".to_string(),
            "02" => "delayed".to_string(),
            other => other.to_string(),
        })
    }

    async fn set_clock(&mut self, now: DateTime<Utc>) -> Result<(), LinkError> {
        let stamp = now.format("%Y/%m/%d %H:%M:%S").to_string();
        self.command("SWS", Some(&stamp)).await.map(|_| ())
    }

    async fn read_clock(&mut self) -> Result<String, LinkError> {
        self.command("GTM", None).await
    }

    async fn uptime_secs(&mut self) -> Result<u64, LinkError> {
        let payload = self.command("UTM", None).await?;
        u64::from_str_radix(&payload, 16).map_err(|_| LinkError::Command {
            cmd: "UTM",
            detail: format!("bad uptime payload: {}", payload),
        })
    }

    async fn battery_raw(&mut self) -> Result<u16, LinkError> {
        let payload = self.command("BAT", None).await?;
        u16::from_str_radix(&payload, 16).map_err(|_| LinkError::Command {
            cmd: "BAT",
            detail: format!("bad battery payload: {}", payload),
        })
    }

    async fn logging_enabled(&mut self) -> Result<bool, LinkError> {
        let payload = self.command("LOG", None).await?;
        Ok(payload == "1")
    }

    async fn toggle_logging(&mut self) -> Result<(), LinkError> {
        self.command("LOG", Some("T")).await.map(|_| ())
    }

    async fn list_files(&mut self) -> Result<Vec<RemoteFile>, LinkError> {
        self.write_frame("DIR", "DIR").await?;
        let mut files = Vec::new();
        loop {
            let frame = self.next_frame("DIR").await?;
            if frame.first() == Some(&DIR_TERMINATOR) {
                break;
            }
            let line = String::from_utf8_lossy(&frame);
            let mut parts = line.trim().rsplitn(2, ' ');
            let size = parts
                .next()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| LinkError::Command {
                    cmd: "DIR",
                    detail: format!("bad listing line: {}", line),
                })?;
            let name = parts.next().unwrap_or_default().to_string();
            if name.is_empty() {
                return Err(LinkError::Command {
                    cmd: "DIR",
                    detail: format!("bad listing line: {}", line),
                });
            }
            files.push(RemoteFile { name, size });
        }
        Ok(files)
    }

    async fn prepare_download(&mut self, file: &RemoteFile) -> Result<(), LinkError> {
        self.command("DWG", Some(&file.name)).await.map(|_| ())
    }

    async fn stream_file(&mut self, file: &RemoteFile) -> Result<Vec<u8>, LinkError> {
        let total = file.size;
        let mut data = Vec::with_capacity(total as usize);
        self.write_frame("DWL", "DWL").await?;
        while (data.len() as u64) < total {
            let chunk = self.next_frame("DWL").await?;
            data.extend_from_slice(&chunk);
            console::download_progress(&self.mac, data.len() as u64, total);
        }
        data.truncate(total as usize);
        Ok(data)
    }

    async fn remote_crc(&mut self, name: &str) -> Result<u32, LinkError> {
        let payload = self.command("CRC", Some(name)).await?;
        u32::from_str_radix(&payload, 16).map_err(|_| LinkError::Command {
            cmd: "CRC",
            detail: format!("bad crc payload: {}", payload),
        })
    }

    async fn delete_file(&mut self, name: &str) -> Result<(), LinkError> {
        let payload = self.command("DEL", Some(name)).await?;
        if payload == "00" {
            Ok(())
        } else {
            Err(LinkError::Command {
                cmd: "DEL",
                detail: format!("delete refused: {}", payload),
            })
        }
    }

    async fn temperature_self_check(&mut self) -> Result<bool, LinkError> {
        let payload = self.command("GST", None).await?;
        Ok(payload == "1")
    }

    async fn pressure_self_check(&mut self) -> Result<bool, LinkError> {
        let payload = self.command("GSP", None).await?;
        Ok(payload == "1")
    }

    async fn set_wake(&mut self, enabled: bool) -> Result<(), LinkError> {
        let arg = if enabled { "on" } else { "off" };
        self.command("WAK", Some(arg)).await.map(|_| ())
    }

    async fn start_new_run(&mut self, fix: &GpsFix) -> Result<(), LinkError> {
        let arg = format!("{:+.6} {:+.6}", fix.lat, fix.lon);
        let payload = self.command("RWS", Some(&arg)).await?;
        if payload == "00" {
            Ok(())
        } else {
            Err(LinkError::Command {
                cmd: "RWS",
                detail: format!("run start refused: {}", payload),
            })
        }
    }

    async fn reset(&mut self) -> Result<(), LinkError> {
        // The device drops the connection on reset; no response expected.
        self.write_frame("RST", "RST").await
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| LinkError::Command {
                cmd: "disconnect",
                detail: e.to_string(),
            })
    }
}
