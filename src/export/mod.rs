//! Snapshot publication and the HTTP surface.

pub mod http;
pub mod telemetry;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};

use crate::promutil::PrometheusMetric;

/// One fully-assembled scrape result.
#[derive(Debug)]
pub struct Snapshot {
    pub metrics: Vec<PrometheusMetric>,
    pub scraped_at: DateTime<Utc>,
}

/// Lock-free store for the last good snapshot.
///
/// A scrape publishes atomically, so an HTTP reader always sees either the
/// previous complete snapshot or the new one, never a partial update.
/// Completion time is tracked separately: failed scrapes count as
/// "completed" for liveness even though they publish nothing.
#[derive(Default)]
pub struct SnapshotStore {
    snapshot: ArcSwapOption<Snapshot>,
    /// Unix seconds of the last finished scrape attempt; 0 = never.
    last_completed: AtomicI64,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a new snapshot, replacing the previous one.
    pub fn publish(&self, snapshot: Snapshot) {
        self.snapshot.store(Some(Arc::new(snapshot)));
    }

    /// The last published snapshot, if any.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.load_full()
    }

    /// Records that a scrape attempt finished (success or failure).
    pub fn mark_completed(&self, at: DateTime<Utc>) {
        self.last_completed.store(at.timestamp(), Ordering::Relaxed);
    }

    /// Whether the last scrape attempt finished within `window` of `now`.
    pub fn healthy(&self, window: Duration, now: DateTime<Utc>) -> bool {
        let last = self.last_completed.load(Ordering::Relaxed);
        if last == 0 {
            return false;
        }
        now.timestamp().saturating_sub(last) <= window.as_secs() as i64
    }
}
