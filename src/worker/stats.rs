//! Processing statistics for a worker run.
//!
//! Counters are lock-free so the host process can read them while the
//! worker thread is running.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Live counters updated by a worker and its handler.
#[derive(Debug)]
pub struct WorkerStats {
    /// Messages returned by the consumer
    messages_consumed: AtomicU64,
    /// Readings successfully classified
    readings_classified: AtomicU64,
    /// Zone events acknowledged by the producer
    zone_events_published: AtomicU64,
    /// When the stats were created
    started_at: DateTime<Utc>,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self {
            messages_consumed: AtomicU64::new(0),
            readings_classified: AtomicU64::new(0),
            zone_events_published: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_consumed(&self) {
        self.messages_consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_classified(&self) {
        self.readings_classified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.zone_events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_consumed(&self) -> u64 {
        self.messages_consumed.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_consumed: self.messages_consumed.load(Ordering::Relaxed),
            readings_classified: self.readings_classified.load(Ordering::Relaxed),
            zone_events_published: self.zone_events_published.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Worker Statistics:\n\
             - Messages consumed: {}\n\
             - Readings classified: {}\n\
             - Zone events published: {}\n\
             - Uptime: {} seconds",
            stats.messages_consumed,
            stats.readings_classified,
            stats.zone_events_published,
            stats.uptime_secs
        )
    }
}

impl Default for WorkerStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of worker statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub messages_consumed: u64,
    pub readings_classified: u64,
    pub zone_events_published: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Thread-safe shared worker statistics.
pub type SharedWorkerStats = Arc<WorkerStats>;

/// Create a new shared statistics handle.
pub fn create_shared_stats() -> SharedWorkerStats {
    Arc::new(WorkerStats::new())
}
