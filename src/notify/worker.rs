//! Outbox drain worker.
//!
//! Delivery to the shore side (satellite modem, cellular queue, whatever the
//! deployment ships with) can take tens of seconds. It therefore runs on its
//! own OS thread, decoupled from the cooperative scheduler that owns the BLE
//! radio. The worker scans the outbox oldest-first, hands each record to the
//! transport, and archives delivered files; failed deliveries stay in place
//! for the next pass.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::Notification;
use crate::config::defaults;
use crate::paths::DataDirs;

/// External delivery path for notifications. The real uplink lives outside
/// this crate; implementations only need to be `Send`.
pub trait NotificationTransport: Send {
    fn name(&self) -> &str;

    /// Deliver one notification. Returning an error leaves the record queued.
    fn deliver(&self, notification: &Notification) -> Result<(), TransportError>;
}

#[derive(Debug, thiserror::Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Default transport: log the record and accept it. Useful on dev platforms
/// and whenever a deployment has no uplink configured.
pub struct LogTransport;

impl NotificationTransport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    fn deliver(&self, notification: &Notification) -> Result<(), TransportError> {
        info!(
            kind = ?notification.kind,
            vessel = %notification.vessel_name,
            "notification delivered (log transport)"
        );
        Ok(())
    }
}

/// Handle to the running outbox worker thread.
pub struct OutboxWorker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl OutboxWorker {
    /// Spawn the drain thread.
    pub fn spawn(dirs: &DataDirs, transport: Box<dyn NotificationTransport>) -> Self {
        Self::spawn_with_poll(
            dirs,
            transport,
            Duration::from_secs(defaults::OUTBOX_POLL_SECS),
        )
    }

    pub fn spawn_with_poll(
        dirs: &DataDirs,
        transport: Box<dyn NotificationTransport>,
        poll: Duration,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let outbox = dirs.outbox();
        let sent = dirs.outbox_sent();

        let handle = std::thread::Builder::new()
            .name("outbox-worker".to_string())
            .spawn(move || {
                info!(transport = transport.name(), "Outbox worker started");
                while !stop_flag.load(Ordering::Relaxed) {
                    drain_once(&outbox, &sent, transport.as_ref());
                    // Sleep in short slices so stop() is responsive.
                    let mut slept = Duration::ZERO;
                    while slept < poll && !stop_flag.load(Ordering::Relaxed) {
                        let slice = Duration::from_millis(200).min(poll - slept);
                        std::thread::sleep(slice);
                        slept += slice;
                    }
                }
                debug!("Outbox worker stopped");
            })
            .ok();

        if handle.is_none() {
            error!("Could not spawn outbox worker thread — notifications will queue up");
        }

        Self {
            stop,
            handle,
        }
    }

    /// Stop the worker and wait for the current pass to finish.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for OutboxWorker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// One drain pass over the outbox. Delivered files move to the sent archive;
/// unreadable files are removed so one corrupt record cannot wedge the queue.
pub fn drain_once(outbox: &Path, sent: &Path, transport: &dyn NotificationTransport) -> usize {
    let mut pending: Vec<PathBuf> = match std::fs::read_dir(outbox) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect(),
        Err(e) => {
            warn!(error = %e, "Could not read outbox directory");
            return 0;
        }
    };
    // Filenames are epoch-nanos, so lexical order is chronological order.
    pending.sort();

    let mut delivered = 0;
    for path in pending {
        let notification: Notification = match std::fs::read(&path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|e| e.to_string()))
        {
            Ok(n) => n,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Corrupted outbox entry — removing");
                let _ = std::fs::remove_file(&path);
                continue;
            }
        };

        match transport.deliver(&notification) {
            Ok(()) => {
                if let Some(name) = path.file_name() {
                    let target = sent.join(name);
                    if let Err(e) = std::fs::rename(&path, &target) {
                        warn!(error = %e, "Delivered but could not archive — removing");
                        let _ = std::fs::remove_file(&path);
                    }
                }
                delivered += 1;
            }
            Err(e) => {
                // Leave the file; stop the pass so ordering is preserved.
                warn!(
                    transport = transport.name(),
                    error = %e,
                    "Delivery failed — will retry next pass"
                );
                break;
            }
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VesselInfo;
    use crate::notify::{NotificationKind, Notifier, TimeCache};
    use std::sync::Mutex;

    struct RecordingTransport {
        delivered: Arc<Mutex<Vec<NotificationKind>>>,
        fail: bool,
    }

    impl NotificationTransport for RecordingTransport {
        fn name(&self) -> &str {
            "recording"
        }
        fn deliver(&self, n: &Notification) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError("down".into()));
            }
            self.delivered.lock().unwrap().push(n.kind);
            Ok(())
        }
    }

    fn setup(tmp: &Path) -> (DataDirs, Notifier) {
        let dirs = DataDirs::new(tmp);
        dirs.ensure().unwrap();
        let notifier = Notifier::new(
            &dirs,
            VesselInfo::default(),
            Arc::new(TimeCache::new()),
        );
        (dirs, notifier)
    }

    #[test]
    fn drain_moves_delivered_to_sent() {
        let tmp = tempfile::tempdir().unwrap();
        let (dirs, notifier) = setup(tmp.path());
        notifier.notify(NotificationKind::Boot, None, None, "");
        notifier.notify(NotificationKind::Alive, None, None, "");

        let delivered = Arc::new(Mutex::new(Vec::new()));
        let transport = RecordingTransport {
            delivered: Arc::clone(&delivered),
            fail: false,
        };
        let n = drain_once(&dirs.outbox(), &dirs.outbox_sent(), &transport);
        assert_eq!(n, 2);
        assert_eq!(delivered.lock().unwrap().len(), 2);
        // Boot was emitted first; ordering must hold.
        assert_eq!(delivered.lock().unwrap()[0], NotificationKind::Boot);

        let left: Vec<_> = std::fs::read_dir(dirs.outbox())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .collect();
        assert!(left.is_empty());
        let archived: Vec<_> = std::fs::read_dir(dirs.outbox_sent())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(archived.len(), 2);
    }

    #[test]
    fn failed_delivery_leaves_file_queued() {
        let tmp = tempfile::tempdir().unwrap();
        let (dirs, notifier) = setup(tmp.path());
        notifier.notify(NotificationKind::Boot, None, None, "");

        let transport = RecordingTransport {
            delivered: Arc::new(Mutex::new(Vec::new())),
            fail: true,
        };
        let n = drain_once(&dirs.outbox(), &dirs.outbox_sent(), &transport);
        assert_eq!(n, 0);
        let left: Vec<_> = std::fs::read_dir(dirs.outbox())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .collect();
        assert_eq!(left.len(), 1);
    }

    #[test]
    fn corrupt_entry_is_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let (dirs, _notifier) = setup(tmp.path());
        std::fs::write(dirs.outbox().join("100.json"), b"not json").unwrap();

        let transport = RecordingTransport {
            delivered: Arc::new(Mutex::new(Vec::new())),
            fail: false,
        };
        drain_once(&dirs.outbox(), &dirs.outbox_sent(), &transport);
        assert!(!dirs.outbox().join("100.json").exists());
    }
}
