//! Behavior flag files.
//!
//! Deployment-site switches follow the fleet convention of file presence as
//! the value: an installer or operator touches a file, the gateway reads it.
//! This keeps overrides working across crashes and restarts with no extra
//! state store.

use std::fs;

use tracing::{info, warn};

use crate::paths::DataDirs;
use crate::types::MacAddr;

/// Reader for the flag files under the data directory.
#[derive(Debug, Clone)]
pub struct Flags {
    dirs: DataDirs,
}

impl Flags {
    pub fn new(dirs: DataDirs) -> Self {
        Self { dirs }
    }

    /// When set, loggers are not re-armed after download.
    pub fn do_not_rerun(&self) -> bool {
        self.dirs.do_not_rerun_flag().exists()
    }

    /// When set, saved filenames get the test-mode prefix.
    pub fn download_test_mode(&self) -> bool {
        self.dirs.download_test_mode_flag().exists()
    }

    /// Consume the lockout-override request if present.
    ///
    /// Returns true exactly once per touch of the flag file.
    pub fn take_lockout_override(&self) -> bool {
        let path = self.dirs.lockout_override_flag();
        if !path.exists() {
            return false;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Lockout override flag consumed");
                true
            }
            Err(e) => {
                warn!(error = %e, "Could not consume lockout override flag");
                false
            }
        }
    }

    /// Consume the per-device needs-reset request if present.
    pub fn take_needs_reset(&self, mac: &MacAddr) -> bool {
        let path = self.dirs.needs_reset_flag(mac);
        if !path.exists() {
            return false;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(mac = %mac, "Needs-reset flag consumed");
                true
            }
            Err(e) => {
                warn!(mac = %mac, error = %e, "Could not consume needs-reset flag");
                false
            }
        }
    }

    /// Request a reset for a device (diagnostics / operator tooling).
    pub fn request_reset(&self, mac: &MacAddr) -> std::io::Result<()> {
        fs::write(self.dirs.needs_reset_flag(mac), mac.as_str())
    }
}
