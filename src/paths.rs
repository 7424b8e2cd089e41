//! Data-directory layout.
//!
//! Everything the gateway persists lives under one root: per-device download
//! folders, the notification outbox, lockout markers, flag files, the
//! session-history database and the crash-alarm stamp. Flag files follow the
//! original deployment convention: presence is the value.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::types::MacAddr;

/// Handle to the gateway data directory layout.
#[derive(Debug, Clone)]
pub struct DataDirs {
    root: PathBuf,
}

impl DataDirs {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create every directory the gateway writes into.
    pub fn ensure(&self) -> io::Result<()> {
        for dir in [
            self.root.clone(),
            self.dl_files(),
            self.outbox(),
            self.outbox_sent(),
            self.lockout_dir(),
            self.flags_dir(),
            self.staging_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Downloads
    // ------------------------------------------------------------------

    /// Root of all per-device download folders.
    pub fn dl_files(&self) -> PathBuf {
        self.root.join("dl_files")
    }

    /// Download folder for one logger; created on demand.
    pub fn download_folder(&self, mac: &MacAddr) -> io::Result<PathBuf> {
        let dir = self.dl_files().join(mac.folder_form());
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Scratch directory for in-flight transfers.
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Staging path for the CRC check of the file currently downloading.
    pub fn crc_staging_file(&self) -> PathBuf {
        self.staging_dir().join("crc_staging.bin")
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    /// Pending notification files awaiting the transport worker.
    pub fn outbox(&self) -> PathBuf {
        self.root.join("outbox")
    }

    /// Delivered notification files, kept for diagnostics.
    pub fn outbox_sent(&self) -> PathBuf {
        self.outbox().join("sent")
    }

    // ------------------------------------------------------------------
    // Lockouts and flags
    // ------------------------------------------------------------------

    /// Per-mac lockout marker files.
    pub fn lockout_dir(&self) -> PathBuf {
        self.root.join("lockout")
    }

    fn flags_dir(&self) -> PathBuf {
        self.root.join("flags")
    }

    /// Presence suppresses the start-new-run command for every logger.
    pub fn do_not_rerun_flag(&self) -> PathBuf {
        self.flags_dir().join("do_not_rerun.flag")
    }

    /// Presence prefixes saved filenames with the test-mode marker.
    pub fn download_test_mode_flag(&self) -> PathBuf {
        self.flags_dir().join("download_test_mode.flag")
    }

    /// Presence requests an immediate clear of all lockout entries.
    pub fn lockout_override_flag(&self) -> PathBuf {
        self.flags_dir().join("lockout_override.flag")
    }

    /// Presence tells the protocol client this device needs a reset command.
    pub fn needs_reset_flag(&self, mac: &MacAddr) -> PathBuf {
        self.flags_dir()
            .join(format!("needs_reset_{}.flag", mac.folder_form()))
    }

    // ------------------------------------------------------------------
    // Misc persistence
    // ------------------------------------------------------------------

    /// Session-history database directory.
    pub fn history_db(&self) -> PathBuf {
        self.root.join("session_history.db")
    }

    /// Crash-alarm rate-limit stamp, shared across supervisor restarts.
    pub fn crash_alarm_stamp(&self) -> PathBuf {
        self.root.join("crash_alarm.stamp")
    }

    /// Orchestrator process lock.
    pub fn process_lock(&self) -> PathBuf {
        self.root.join(".deckhand.lock")
    }
}
