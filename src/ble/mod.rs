//! BLE stage: radio abstraction, per-logger protocol engine, fleet scanner.

pub mod btle;
pub mod client;
pub mod link;
pub mod scanner;

pub use client::LoggerProtocolClient;
pub use link::{
    choose_scan_mode, Advertisement, LinkError, LoggerLink, LoggerRadio, ScanMode,
};
pub use scanner::FleetScanner;
