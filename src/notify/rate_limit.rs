//! Keyed rate limiter for recurring events.
//!
//! The scanner, orchestrator and notifier all need "at most once per period"
//! behavior for noisy conditions (hardware errors, crowded radio
//! environments, alive pings). Keys are free-form strings so call sites own
//! their own namespaces.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Tracks the last time each keyed event fired.
///
/// Interior mutability so one instance can be shared behind an `Arc` across
/// the scanner and orchestrator without threading `&mut` everywhere.
#[derive(Debug, Default)]
pub struct TimeCache {
    last_fired: Mutex<HashMap<String, Instant>>,
}

impl TimeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true (and records the firing) if `period` has elapsed since
    /// the last firing of `key`, or if `key` never fired.
    pub fn is_it_time_to(&self, key: &str, period: Duration) -> bool {
        let mut map = match self.last_fired.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        match map.get(key) {
            Some(last) if now.duration_since(*last) < period => false,
            _ => {
                map.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Forget a key so its next check fires immediately.
    pub fn reset(&self, key: &str) {
        let mut map = match self.last_fired.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.remove(key);
    }
}
