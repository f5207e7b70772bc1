// Store metrics module
//
// Counts mutations and notifications so a long-running process can report how
// busy its settings store is and whether any listener misbehaved.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Per-store counters.
///
/// Uses atomic operations so views on any thread can record without locking.
#[derive(Debug)]
pub struct StoreMetrics {
    /// Assignments that changed a value
    pub writes: AtomicU64,

    /// Assignments skipped because the value was already equal
    pub noop_writes: AtomicU64,

    /// Keys removed
    pub deletes: AtomicU64,

    /// Global listener invocations
    pub global_notifications: AtomicU64,

    /// Path-scoped listener invocations
    pub path_notifications: AtomicU64,

    /// Listener invocations that panicked and were isolated
    pub listener_panics: AtomicU64,

    /// Wholesale replacements through `set_data`
    pub data_replacements: AtomicU64,

    created: Instant,
}

impl StoreMetrics {
    pub fn new() -> Self {
        Self {
            writes: AtomicU64::new(0),
            noop_writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            global_notifications: AtomicU64::new(0),
            path_notifications: AtomicU64::new(0),
            listener_panics: AtomicU64::new(0),
            data_replacements: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_noop_write(&self) {
        self.noop_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_global_notification(&self) {
        self.global_notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_path_notification(&self) {
        self.path_notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_listener_panic(&self) {
        self.listener_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_data_replacement(&self) {
        self.data_replacements.fetch_add(1, Ordering::Relaxed);
    }

    /// Time since the store was created
    pub fn uptime(&self) -> Duration {
        self.created.elapsed()
    }

    /// One-line summary suitable for logs or CLI output
    pub fn summary(&self) -> String {
        format!(
            "{} writes ({} no-op), {} deletes, {} replacements, {} global / {} path notifications, {} listener panics",
            self.writes.load(Ordering::Relaxed),
            self.noop_writes.load(Ordering::Relaxed),
            self.deletes.load(Ordering::Relaxed),
            self.data_replacements.load(Ordering::Relaxed),
            self.global_notifications.load(Ordering::Relaxed),
            self.path_notifications.load(Ordering::Relaxed),
            self.listener_panics.load(Ordering::Relaxed)
        )
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!(
            "Store metrics after {:.2}s: {}",
            self.uptime().as_secs_f64(),
            self.summary()
        );

        let panics = self.listener_panics.load(Ordering::Relaxed);
        if panics > 0 {
            tracing::warn!("{} listener invocations panicked", panics);
        }
    }
}

impl Default for StoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}
