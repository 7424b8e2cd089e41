//! deckhand — vessel deck gateway for BLE sensor loggers.
//!
//! A field gateway that scans for battery-powered data loggers over BLE,
//! downloads their recorded files with integrity checking, re-arms them for
//! the next recording run, and keeps operating through radio trouble and
//! process crashes. Two processes cooperate: the orchestrator (this
//! library's [`orchestrator`] loop, built by the `deckhand` binary) and a
//! supervising parent (`deckhand-supervisor`) that restarts it after any
//! crash with rate-limited alarms.

pub mod artifacts;
pub mod ble;
pub mod config;
pub mod console;
pub mod notify;
pub mod orchestrator;
pub mod paths;
pub mod registry;
pub mod storage;
pub mod supervisor;
pub mod types;
