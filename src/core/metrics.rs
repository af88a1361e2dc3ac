use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Snapshot of listener counters at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_accepted: u64,
    pub connections_held: u64,
    pub accept_errors: u64,
    pub last_accept_time: Option<Instant>,
}

/// Thread-safe counters for one listener
#[derive(Debug, Default)]
pub struct ListenerMetrics {
    connections_accepted: AtomicU64,
    connections_held: AtomicU64,
    accept_errors: AtomicU64,
    last_accept_time: Mutex<Option<Instant>>,
}

impl ListenerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accept(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_accept_time.lock() {
            *last = Some(Instant::now());
        }
    }

    pub fn record_accept_error(&self) {
        self.accept_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_held(&self) {
        self.connections_held.fetch_add(1, Ordering::Relaxed);
    }

    pub fn release_held(&self, count: u64) {
        self.connections_held.fetch_sub(count, Ordering::Relaxed);
    }

    /// Zero the held gauge on close, returning how many were still held
    pub fn release_all_held(&self) -> u64 {
        self.connections_held.swap(0, Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_held: self.connections_held.load(Ordering::Relaxed),
            accept_errors: self.accept_errors.load(Ordering::Relaxed),
            last_accept_time: self.last_accept_time.lock().ok().and_then(|t| *t),
        }
    }
}
