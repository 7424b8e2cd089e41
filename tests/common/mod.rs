//! Shared test doubles: scripted radio/link, static fix source, tempdir env.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use deckhand::ble::{Advertisement, LinkError, LoggerLink, LoggerRadio, ScanMode};
use deckhand::config::VesselInfo;
use deckhand::notify::{Notifier, TimeCache};
use deckhand::orchestrator::FixSource;
use deckhand::paths::DataDirs;
use deckhand::registry::Flags;
use deckhand::types::{GpsFix, LoggerIdentity, LoggerType, MacAddr, RemoteFile};

// ============================================================================
// Fixtures
// ============================================================================

pub fn mac1() -> MacAddr {
    MacAddr::parse("aa:bb:cc:dd:ee:01").unwrap()
}

pub fn identity1() -> LoggerIdentity {
    LoggerIdentity {
        mac: mac1(),
        serial_number: "2305778".to_string(),
        kind: LoggerType::Tdo,
    }
}

pub fn fix_at_speed(speed_knots: f64) -> GpsFix {
    GpsFix {
        lat: -41.2865,
        lon: 174.7762,
        timestamp: Utc::now(),
        speed_knots,
    }
}

/// Tempdir-backed gateway environment: dirs, flags, notifier, time cache.
pub struct TestEnv {
    pub dirs: DataDirs,
    pub flags: Flags,
    pub notifier: Notifier,
    pub time_cache: Arc<TimeCache>,
}

pub fn test_env(root: &std::path::Path) -> TestEnv {
    let dirs = DataDirs::new(root);
    dirs.ensure().unwrap();
    let time_cache = Arc::new(TimeCache::new());
    let notifier = Notifier::new(
        &dirs,
        VesselInfo {
            name: "FV Test".to_string(),
            box_serial: "DH-0001".to_string(),
            project: "unit-tests".to_string(),
        },
        Arc::clone(&time_cache),
    );
    let flags = Flags::new(dirs.clone());
    TestEnv {
        dirs,
        flags,
        notifier,
        time_cache,
    }
}

/// Kinds of the notifications currently queued in the outbox, oldest first.
pub fn outbox_kinds(dirs: &DataDirs) -> Vec<deckhand::notify::NotificationKind> {
    let mut paths: Vec<_> = std::fs::read_dir(dirs.outbox())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();
    paths
        .iter()
        .map(|p| {
            let n: deckhand::notify::Notification =
                serde_json::from_slice(&std::fs::read(p).unwrap()).unwrap();
            n.kind
        })
        .collect()
}

// ============================================================================
// Scripted logger link
// ============================================================================

/// Behavior script for one connected-logger double.
#[derive(Clone)]
pub struct LinkSpec {
    pub firmware: String,
    pub battery_raw: u16,
    /// Listing order is preserved.
    pub files: Vec<RemoteFile>,
    /// Payload per file name.
    pub data: HashMap<String, Vec<u8>>,
    /// Files whose reported CRC will not match the payload.
    pub bad_crc: HashSet<String>,
    pub temperature_ok: bool,
    pub pressure_ok: bool,
    /// Start-new-run refuses.
    pub rws_fails: bool,
    /// Make this protocol step fail at the transport level.
    pub fail_cmd: Option<&'static str>,
    pub logging_enabled: bool,
}

impl Default for LinkSpec {
    fn default() -> Self {
        Self {
            firmware: "4.0.33".to_string(),
            battery_raw: 1400,
            files: Vec::new(),
            data: HashMap::new(),
            bad_crc: HashSet::new(),
            temperature_ok: true,
            pressure_ok: true,
            rws_fails: false,
            fail_cmd: None,
            logging_enabled: false,
        }
    }
}

impl LinkSpec {
    pub fn with_file(mut self, name: &str, payload: &[u8]) -> Self {
        self.files.push(RemoteFile {
            name: name.to_string(),
            size: payload.len() as u64,
        });
        self.data.insert(name.to_string(), payload.to_vec());
        self
    }

    pub fn with_empty_file(mut self, name: &str) -> Self {
        self.files.push(RemoteFile {
            name: name.to_string(),
            size: 0,
        });
        self
    }
}

/// Observable side effects of one session, shared with the test.
#[derive(Default)]
pub struct LinkState {
    pub deleted: Vec<String>,
    pub run_started: bool,
    pub wake: Option<bool>,
    pub clock_sets: usize,
    pub logging_toggles: usize,
    pub disconnected: bool,
    pub reset_issued: bool,
}

pub struct MockLink {
    spec: LinkSpec,
    state: Arc<Mutex<LinkState>>,
}

impl MockLink {
    pub fn new(spec: LinkSpec) -> (Self, Arc<Mutex<LinkState>>) {
        let state = Arc::new(Mutex::new(LinkState::default()));
        (
            Self {
                spec,
                state: Arc::clone(&state),
            },
            state,
        )
    }

    fn maybe_fail(&self, cmd: &'static str) -> Result<(), LinkError> {
        if self.spec.fail_cmd == Some(cmd) {
            Err(LinkError::Command {
                cmd,
                detail: "scripted failure".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LoggerLink for MockLink {
    async fn firmware_version(&mut self) -> Result<String, LinkError> {
        self.maybe_fail("gfv")?;
        Ok(self.spec.firmware.clone())
    }

    async fn status(&mut self) -> Result<String, LinkError> {
        self.maybe_fail("sts")?;
        Ok("stopped".to_string())
    }

    async fn set_clock(&mut self, _now: DateTime<Utc>) -> Result<(), LinkError> {
        let count = {
            let mut st = self.state.lock().unwrap();
            st.clock_sets += 1;
            st.clock_sets
        };
        if count == 1 {
            self.maybe_fail("sws")?;
        } else {
            self.maybe_fail("stm")?;
        }
        Ok(())
    }

    async fn read_clock(&mut self) -> Result<String, LinkError> {
        self.maybe_fail("gtm")?;
        Ok("2026/08/06 03:14:15".to_string())
    }

    async fn uptime_secs(&mut self) -> Result<u64, LinkError> {
        self.maybe_fail("utm")?;
        Ok(86_400)
    }

    async fn battery_raw(&mut self) -> Result<u16, LinkError> {
        self.maybe_fail("bat")?;
        Ok(self.spec.battery_raw)
    }

    async fn logging_enabled(&mut self) -> Result<bool, LinkError> {
        self.maybe_fail("log")?;
        Ok(self.spec.logging_enabled)
    }

    async fn toggle_logging(&mut self) -> Result<(), LinkError> {
        self.maybe_fail("log")?;
        self.state.lock().unwrap().logging_toggles += 1;
        Ok(())
    }

    async fn list_files(&mut self) -> Result<Vec<RemoteFile>, LinkError> {
        self.maybe_fail("dir")?;
        Ok(self.spec.files.clone())
    }

    async fn prepare_download(&mut self, _file: &RemoteFile) -> Result<(), LinkError> {
        self.maybe_fail("dwg")?;
        Ok(())
    }

    async fn stream_file(&mut self, file: &RemoteFile) -> Result<Vec<u8>, LinkError> {
        self.maybe_fail("dwl")?;
        self.spec
            .data
            .get(&file.name)
            .cloned()
            .ok_or(LinkError::Command {
                cmd: "dwl",
                detail: "no payload scripted".to_string(),
            })
    }

    async fn remote_crc(&mut self, name: &str) -> Result<u32, LinkError> {
        self.maybe_fail("crc")?;
        let crc = self
            .spec
            .data
            .get(name)
            .map(|d| crc32fast::hash(d))
            .unwrap_or(0);
        if self.spec.bad_crc.contains(name) {
            Ok(!crc)
        } else {
            Ok(crc)
        }
    }

    async fn delete_file(&mut self, name: &str) -> Result<(), LinkError> {
        self.maybe_fail("del")?;
        self.state.lock().unwrap().deleted.push(name.to_string());
        Ok(())
    }

    async fn temperature_self_check(&mut self) -> Result<bool, LinkError> {
        self.maybe_fail("gst")?;
        Ok(self.spec.temperature_ok)
    }

    async fn pressure_self_check(&mut self) -> Result<bool, LinkError> {
        self.maybe_fail("gsp")?;
        Ok(self.spec.pressure_ok)
    }

    async fn set_wake(&mut self, enabled: bool) -> Result<(), LinkError> {
        self.maybe_fail("wak")?;
        self.state.lock().unwrap().wake = Some(enabled);
        Ok(())
    }

    async fn start_new_run(&mut self, _fix: &GpsFix) -> Result<(), LinkError> {
        if self.spec.rws_fails {
            return Err(LinkError::Command {
                cmd: "rws",
                detail: "run start refused".to_string(),
            });
        }
        self.state.lock().unwrap().run_started = true;
        Ok(())
    }

    async fn reset(&mut self) -> Result<(), LinkError> {
        self.maybe_fail("rst")?;
        self.state.lock().unwrap().reset_issued = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        self.state.lock().unwrap().disconnected = true;
        Ok(())
    }
}

// ============================================================================
// Scripted radio
// ============================================================================

/// Radio double: replays advertisements on every scan, hands out queued
/// links on connect, records scans and force-disconnects.
pub struct MockRadio {
    pub adverts: Mutex<Vec<Advertisement>>,
    pub scan_fail: bool,
    pub up: bool,
    links: Mutex<VecDeque<MockLink>>,
    pub scan_calls: Mutex<usize>,
    pub force_disconnects: Mutex<Vec<MacAddr>>,
}

impl MockRadio {
    pub fn new() -> Self {
        Self {
            adverts: Mutex::new(Vec::new()),
            scan_fail: false,
            up: true,
            links: Mutex::new(VecDeque::new()),
            scan_calls: Mutex::new(0),
            force_disconnects: Mutex::new(Vec::new()),
        }
    }

    pub fn advertise(&self, mac: &MacAddr, name: &str) {
        self.adverts.lock().unwrap().push(Advertisement {
            mac: mac.clone(),
            name: name.to_string(),
            rssi: Some(-60),
        });
    }

    /// Queue a link for the next connect; returns its observable state.
    pub fn queue_link(&self, spec: LinkSpec) -> Arc<Mutex<LinkState>> {
        let (link, state) = MockLink::new(spec);
        self.links.lock().unwrap().push_back(link);
        state
    }

    pub fn scan_count(&self) -> usize {
        *self.scan_calls.lock().unwrap()
    }
}

#[async_trait]
impl LoggerRadio for MockRadio {
    fn antenna(&self) -> String {
        "hci-test".to_string()
    }

    fn stack_version(&self) -> String {
        "5.66".to_string()
    }

    async fn is_up(&self) -> bool {
        self.up
    }

    async fn scan(
        &self,
        _mode: ScanMode,
        events: mpsc::Sender<Advertisement>,
        stop: CancellationToken,
    ) -> Result<(), LinkError> {
        *self.scan_calls.lock().unwrap() += 1;
        if self.scan_fail {
            return Err(LinkError::Stack("simulated stack failure".to_string()));
        }
        let adverts = self.adverts.lock().unwrap().clone();
        for adv in adverts {
            if events.send(adv).await.is_err() {
                return Ok(());
            }
        }
        // Keep the scan open until the caller stops it, like real hardware.
        stop.cancelled().await;
        Ok(())
    }

    async fn connect(&self, mac: &MacAddr) -> Result<Box<dyn LoggerLink>, LinkError> {
        match self.links.lock().unwrap().pop_front() {
            Some(link) => Ok(Box::new(link)),
            None => Err(LinkError::NotFound(mac.clone())),
        }
    }

    async fn force_disconnect(&self, mac: &MacAddr) {
        self.force_disconnects.lock().unwrap().push(mac.clone());
    }
}

// ============================================================================
// Static fix source
// ============================================================================

pub struct StaticFixSource {
    pub fix: Option<GpsFix>,
    pub synced: bool,
}

impl FixSource for StaticFixSource {
    fn current_fix(&self) -> Option<GpsFix> {
        self.fix.clone()
    }

    fn is_time_synced(&self) -> bool {
        self.synced
    }
}

/// Monitored-set helper.
pub fn monitored_with(identity: &LoggerIdentity) -> BTreeMap<MacAddr, LoggerIdentity> {
    let mut map = BTreeMap::new();
    map.insert(identity.mac.clone(), identity.clone());
    map
}
