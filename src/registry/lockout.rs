//! Lockout registry — temporary exclusion of misbehaving loggers.
//!
//! One marker file per blacklisted mac. The creation instant is the marker's
//! modification time; expiry is computed lazily at lookup, never swept. The
//! persistence contract survives crashes and supervisor restarts: a device
//! locked out before a crash stays locked out after the restart.
//!
//! Single-writer semantics: exactly one orchestrator process owns this
//! registry at a time (enforced by the process lock at startup).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::types::MacAddr;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("lockout registry io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Marker-file registry of temporarily blacklisted loggers.
#[derive(Debug, Clone)]
pub struct LockoutRegistry {
    dir: PathBuf,
    cooldown: Duration,
}

impl LockoutRegistry {
    /// Open the registry rooted at `dir`, creating it if needed.
    pub fn open<P: AsRef<Path>>(dir: P, cooldown: Duration) -> Result<Self, RegistryError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| RegistryError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir, cooldown })
    }

    fn marker_path(&self, mac: &MacAddr) -> PathBuf {
        self.dir.join(mac.folder_form())
    }

    /// True while a live (non-expired) marker exists for this mac.
    ///
    /// Expired markers are left in place — only `lock` refreshes them and
    /// only `clear`/`clear_all` remove them.
    pub fn is_locked_out(&self, mac: &MacAddr) -> bool {
        let path = self.marker_path(mac);
        let created_at = match fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => return false,
        };
        match SystemTime::now().duration_since(created_at) {
            Ok(age) => age < self.cooldown,
            // Marker from the future (clock stepped backwards) — treat as live.
            Err(_) => true,
        }
    }

    /// Add or refresh the marker for this mac. Rewriting restarts the cooldown.
    pub fn lock(&self, mac: &MacAddr) -> Result<(), RegistryError> {
        let path = self.marker_path(mac);
        fs::write(&path, mac.as_str()).map_err(|source| RegistryError::Io {
            path: path.clone(),
            source,
        })?;
        info!(mac = %mac, cooldown_secs = self.cooldown.as_secs(), "Logger locked out");
        Ok(())
    }

    /// Remove the marker for one mac, live or not.
    pub fn clear(&self, mac: &MacAddr) {
        let path = self.marker_path(mac);
        match fs::remove_file(&path) {
            Ok(()) => debug!(mac = %mac, "Lockout cleared"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(mac = %mac, error = %e, "Could not clear lockout marker"),
        }
    }

    /// Remove every marker (the operator override path).
    pub fn clear_all(&self) -> usize {
        let mut cleared = 0;
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "Could not read lockout directory");
                return 0;
            }
        };
        for entry in entries.filter_map(|e| e.ok()) {
            if entry.path().is_file() && fs::remove_file(entry.path()).is_ok() {
                cleared += 1;
            }
        }
        if cleared > 0 {
            info!(cleared, "All lockout markers cleared by override");
        }
        cleared
    }

    /// Macs with a live marker, for diagnostics.
    pub fn locked_macs(&self) -> Vec<MacAddr> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                MacAddr::parse(&name)
            })
            .filter(|mac| self.is_locked_out(mac))
            .collect()
    }

    #[cfg(test)]
    pub fn marker_path_for_test(&self, mac: &MacAddr) -> PathBuf {
        self.marker_path(mac)
    }
}
