//! Session statistics tracking
//!
//! Counters are written from the delivery thread and read from callers, so
//! they are plain atomics. Rates are measured from the most recent start.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub records: u64,
    pub bytes: u64,
    pub events: u64,
    pub heartbeats: u64,
    pub dispatch_errors: u64,
    pub callback_faults: u64,
    pub restarts: u64,
    pub starts: u64,
    pub records_per_sec: f64,
}

#[derive(Debug, Default)]
pub struct SessionStats {
    started_at: Mutex<Option<Instant>>,
    records: AtomicU64,
    bytes: AtomicU64,
    events: AtomicU64,
    heartbeats: AtomicU64,
    dispatch_errors: AtomicU64,
    callback_faults: AtomicU64,
    restarts: AtomicU64,
    starts: AtomicU64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of a delivery loop
    pub fn on_start(&self) {
        *self.started_at.lock() = Some(Instant::now());
        self.starts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, size: usize) {
        self.records.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_event(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heartbeat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch_error(&self) {
        self.dispatch_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_callback_fault(&self) {
        self.callback_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.lock().map(|st| st.elapsed())
    }

    /// Records per second since the last start
    pub fn records_per_sec(&self) -> f64 {
        match self.elapsed() {
            Some(elapsed) if elapsed.as_secs_f64() > 0.0 => {
                self.records.load(Ordering::Relaxed) as f64 / elapsed.as_secs_f64()
            }
            _ => 0.0,
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            records: self.records.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            dispatch_errors: self.dispatch_errors.load(Ordering::Relaxed),
            callback_faults: self.callback_faults.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            starts: self.starts.load(Ordering::Relaxed),
            records_per_sec: self.records_per_sec(),
        }
    }

    /// Emit a one-line summary at info level
    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            records = s.records,
            bytes = s.bytes,
            events = s.events,
            heartbeats = s.heartbeats,
            dispatch_errors = s.dispatch_errors,
            callback_faults = s.callback_faults,
            restarts = s.restarts,
            starts = s.starts,
            records_per_sec = format_args!("{:.2}", s.records_per_sec),
            "session statistics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_delivered() {
        let stats = SessionStats::new();
        stats.record_delivered(48);
        stats.record_delivered(176);
        let snap = stats.snapshot();
        assert_eq!(snap.records, 2);
        assert_eq!(snap.bytes, 224);
    }

    #[test]
    fn test_rate_is_zero_before_start() {
        let stats = SessionStats::new();
        stats.record_delivered(48);
        assert_eq!(stats.records_per_sec(), 0.0);
        assert!(stats.elapsed().is_none());
    }

    #[test]
    fn test_fault_counters() {
        let stats = SessionStats::new();
        stats.on_start();
        stats.record_dispatch_error();
        stats.record_callback_fault();
        stats.record_callback_fault();
        stats.record_restart();
        let snap = stats.snapshot();
        assert_eq!(snap.starts, 1);
        assert_eq!(snap.dispatch_errors, 1);
        assert_eq!(snap.callback_faults, 2);
        assert_eq!(snap.restarts, 1);
    }
}
