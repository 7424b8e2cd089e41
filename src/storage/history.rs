//! Session History Storage
//!
//! Persists a summary of every successful logger interaction to a sled DB.
//! Timestamp-based keys give natural chronological ordering; values are
//! JSON so shore-side tooling can read them without this crate.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::DownloadSession;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// What one interaction leaves behind for the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub timestamp: u64,
    pub mac: String,
    pub serial_number: String,
    pub logger_type: String,
    pub completed: bool,
    pub crit_error: bool,
    pub error: Option<String>,
    pub files_listed: usize,
    pub files_saved: usize,
    pub battery_mv: Option<f64>,
    pub rerun_armed: bool,
}

impl SessionRecord {
    pub fn from_session(session: &DownloadSession) -> Self {
        Self {
            timestamp: session.started_at.timestamp().max(0) as u64,
            mac: session.identity.mac.to_string(),
            serial_number: session.identity.serial_number.clone(),
            logger_type: session.identity.kind.to_string(),
            completed: session.completed,
            crit_error: session.crit_error,
            error: session.error.as_ref().map(|e| e.to_string()),
            files_listed: session.downloaded.len(),
            files_saved: session.files_saved(),
            battery_mv: session.battery_mv,
            rerun_armed: session.rerun_armed,
        }
    }
}

/// Handle to the session-history database. Cheap to clone.
#[derive(Clone)]
pub struct SessionHistory {
    db: Arc<sled::Db>,
}

impl SessionHistory {
    /// Open or create the history database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Store a session record.
    ///
    /// Key: timestamp as u64 big-endian bytes (sorts chronologically).
    /// Sled's background flushing gives durability; losing the last few
    /// writes in a crash is acceptable for an audit log.
    pub fn store(&self, record: &SessionRecord) -> Result<(), StorageError> {
        let key = record.timestamp.to_be_bytes();
        let value = serde_json::to_vec(record)?;
        self.db.insert(key, value)?;
        Ok(())
    }

    /// Most recent N records, newest first.
    pub fn recent(&self, limit: usize) -> Vec<SessionRecord> {
        let mut records = Vec::with_capacity(limit);
        for item in self.db.iter().rev() {
            if records.len() >= limit {
                break;
            }
            if let Ok((_key, value)) = item {
                if let Ok(record) = serde_json::from_slice::<SessionRecord>(&value) {
                    records.push(record);
                }
            }
        }
        records
    }

    /// Total number of stored records.
    pub fn count(&self) -> usize {
        self.db.len()
    }

    /// Delete records older than the cutoff timestamp. Returns how many.
    pub fn prune_before(&self, cutoff_ts: u64) -> Result<usize, StorageError> {
        let cutoff_key = cutoff_ts.to_be_bytes();
        let keys_to_delete: Vec<_> = self
            .db
            .iter()
            .filter_map(|item| {
                item.ok().and_then(|(key, _)| {
                    (key.as_ref() < cutoff_key.as_slice()).then(|| key.to_vec())
                })
            })
            .collect();

        let mut deleted = 0;
        for key in keys_to_delete {
            self.db.remove(key)?;
            deleted += 1;
        }
        if deleted > 0 {
            self.db.flush()?;
        }
        Ok(deleted)
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}
