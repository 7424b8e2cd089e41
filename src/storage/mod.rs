//! Local persistence: the orchestrator process lock and the session-history
//! database.

pub mod history;
pub mod lockfile;

pub use history::{SessionHistory, SessionRecord, StorageError};
pub use lockfile::ProcessLock;
