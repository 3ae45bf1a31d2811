//! Shared run statistics.
//!
//! One accumulator is shared by every worker in a run. All reads and
//! read-modify-writes go through a single mutex; the histogram maps rule
//! out plain atomics, and contention is negligible at pipeline rates.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::portal::Portal;

/// Point-in-time copy of the accumulated counters.
///
/// Serialized into checkpoint files, so field names are part of the
/// checkpoint format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Records settled as completed.
    pub completed: u64,
    /// Records settled as failed (including re-queues for retry).
    pub failed: u64,
    /// Records settled as skipped.
    pub skipped: u64,
    /// Claims lost to a concurrent worker.
    pub claim_lost: u64,
    /// Locator mismatches observed on completed records.
    pub mismatches: u64,
    /// Total bytes fetched before optimization.
    pub bytes_original: u64,
    /// Total bytes after optimization.
    pub bytes_optimized: u64,
    /// Completed-record counts per portal.
    pub by_portal: BTreeMap<String, u64>,
    /// Error counts per stable kind key.
    pub errors: BTreeMap<String, u64>,
}

impl StatsSnapshot {
    /// Records processed to a terminal state in this run.
    #[must_use]
    pub fn total_settled(&self) -> u64 {
        self.completed + self.failed + self.skipped
    }

    /// Bytes saved by optimization across the run.
    #[must_use]
    pub fn bytes_saved(&self) -> u64 {
        self.bytes_original.saturating_sub(self.bytes_optimized)
    }
}

/// Thread-safe statistics accumulator shared across workers.
#[derive(Debug, Default)]
pub struct PipelineStats {
    inner: Mutex<StatsSnapshot>,
}

impl PipelineStats {
    /// Creates a zeroed accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an accumulator seeded from a checkpoint snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: StatsSnapshot) -> Self {
        Self {
            inner: Mutex::new(snapshot),
        }
    }

    /// Records a completed record.
    pub fn record_completed(
        &self,
        portal: Portal,
        original_size: u64,
        optimized_size: u64,
        mismatch: bool,
    ) {
        let mut inner = self.lock();
        inner.completed += 1;
        inner.bytes_original += original_size;
        inner.bytes_optimized += optimized_size;
        if mismatch {
            inner.mismatches += 1;
        }
        *inner.by_portal.entry(portal.as_str().to_string()).or_insert(0) += 1;
    }

    /// Records a failure bucketed by error kind.
    pub fn record_failed(&self, kind_key: &str) {
        let mut inner = self.lock();
        inner.failed += 1;
        *inner.errors.entry(kind_key.to_string()).or_insert(0) += 1;
    }

    /// Records a terminal skip bucketed by error kind.
    pub fn record_skipped(&self, kind_key: &str) {
        let mut inner = self.lock();
        inner.skipped += 1;
        *inner.errors.entry(kind_key.to_string()).or_insert(0) += 1;
    }

    /// Records a claim lost to another worker.
    pub fn record_claim_lost(&self) {
        self.lock().claim_lost += 1;
    }

    /// Records a soft error that did not fail the record
    /// (e.g. optimizer fallback to original bytes).
    pub fn record_soft_error(&self, kind_key: &str) {
        *self.lock().errors.entry(kind_key.to_string()).or_insert(0) += 1;
    }

    /// Returns a copy of the current counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        self.lock().clone()
    }

    /// Replaces the counters wholesale, e.g. from a resume checkpoint.
    pub fn restore(&self, snapshot: StatsSnapshot) {
        *self.lock() = snapshot;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StatsSnapshot> {
        // A poisoned stats mutex means a panicked worker thread; the
        // counters are still structurally valid, so keep going.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_snapshot_starts_zeroed() {
        let stats = PipelineStats::new();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_settled(), 0);
        assert!(snapshot.by_portal.is_empty());
        assert!(snapshot.errors.is_empty());
    }

    #[test]
    fn test_record_completed_accumulates() {
        let stats = PipelineStats::new();
        stats.record_completed(Portal::Historical, 1000, 600, false);
        stats.record_completed(Portal::Mid, 2000, 900, true);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.completed, 2);
        assert_eq!(snapshot.mismatches, 1);
        assert_eq!(snapshot.bytes_original, 3000);
        assert_eq!(snapshot.bytes_optimized, 1500);
        assert_eq!(snapshot.bytes_saved(), 1500);
        assert_eq!(snapshot.by_portal["historical"], 1);
        assert_eq!(snapshot.by_portal["mid"], 1);
    }

    #[test]
    fn test_error_histogram_buckets_by_kind() {
        let stats = PipelineStats::new();
        stats.record_failed("timeout");
        stats.record_failed("timeout");
        stats.record_failed("network");
        stats.record_skipped("excluded_portal");
        stats.record_soft_error("optimizer_failure");

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.failed, 2 + 1);
        assert_eq!(snapshot.skipped, 1);
        assert_eq!(snapshot.errors["timeout"], 2);
        assert_eq!(snapshot.errors["network"], 1);
        assert_eq!(snapshot.errors["excluded_portal"], 1);
        assert_eq!(snapshot.errors["optimizer_failure"], 1);
    }

    #[test]
    fn test_from_snapshot_resumes_counts() {
        let mut seed = StatsSnapshot::default();
        seed.completed = 40;
        seed.errors.insert("timeout".to_string(), 3);

        let stats = PipelineStats::from_snapshot(seed);
        stats.record_completed(Portal::Mid, 10, 5, false);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.completed, 41);
        assert_eq!(snapshot.errors["timeout"], 3);
    }

    #[test]
    fn test_concurrent_recording() {
        let stats = Arc::new(PipelineStats::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let stats = Arc::clone(&stats);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    stats.record_completed(Portal::Historical, 10, 5, false);
                    stats.record_failed("network");
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.completed, 800);
        assert_eq!(snapshot.failed, 800);
        assert_eq!(snapshot.errors["network"], 800);
    }

    #[test]
    fn test_snapshot_serializes_for_checkpoint() {
        let stats = PipelineStats::new();
        stats.record_completed(Portal::Mid, 100, 50, false);

        let json = serde_json::to_string(&stats.snapshot()).unwrap();
        let parsed: StatsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.completed, 1);
        assert_eq!(parsed.by_portal["mid"], 1);
    }
}
