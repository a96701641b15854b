//! Sync counters shared between the engine and the metrics exporter.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Counters updated after every cycle. Constructed once and shared by `Arc`.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    syncs_total: AtomicU64,
    syncs_with_changes: AtomicU64,
    sync_errors_total: AtomicU64,
    last_duration_ms: AtomicU64,
    /// Unix milliseconds; 0 until the first cycle finishes
    last_finished_ms: AtomicI64,
}

/// Point-in-time copy of [`SyncMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub syncs_total: u64,
    pub syncs_with_changes: u64,
    pub sync_errors_total: u64,
    pub last_duration_ms: u64,
    pub last_finished: Option<DateTime<Utc>>,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished cycle
    pub fn record_cycle(&self, changed: bool, failed: bool, duration: Duration) {
        self.syncs_total.fetch_add(1, Ordering::Relaxed);
        if changed {
            self.syncs_with_changes.fetch_add(1, Ordering::Relaxed);
        }
        if failed {
            self.sync_errors_total.fetch_add(1, Ordering::Relaxed);
        }
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.last_duration_ms.store(millis, Ordering::Relaxed);
        self.last_finished_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let finished = self.last_finished_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            syncs_total: self.syncs_total.load(Ordering::Relaxed),
            syncs_with_changes: self.syncs_with_changes.load(Ordering::Relaxed),
            sync_errors_total: self.sync_errors_total.load(Ordering::Relaxed),
            last_duration_ms: self.last_duration_ms.load(Ordering::Relaxed),
            last_finished: if finished == 0 {
                None
            } else {
                DateTime::from_timestamp_millis(finished)
            },
        }
    }
}
