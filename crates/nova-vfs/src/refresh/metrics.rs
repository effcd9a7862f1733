use std::sync::Arc;
use std::time::{Duration, Instant};

use nova_metrics::{MetricsRegistry, RefreshScanSample};
use serde::Serialize;

/// Runs `f`, adding its wall time to `acc`.
pub(crate) fn timed<R>(acc: &mut Duration, f: impl FnOnce() -> R) -> R {
    let start = Instant::now();
    let result = f();
    *acc += start.elapsed();
    result
}

/// Counters accumulated by one worker while it drains its queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanCounters {
    /// Full-diff attempts, including rolled back ones.
    pub full_scans: u64,
    /// Partial-diff attempts, including rolled back ones.
    pub partial_scans: u64,
    /// Directories taken off the queue for good (committed or skipped).
    pub processed: u64,
    pub skipped: u64,
    pub vfs_time: Duration,
    pub io_time: Duration,
}

/// How a [`RefreshWorker::scan`](super::RefreshWorker::scan) ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanOutcome {
    Completed,
    Cancelled,
    /// The root no longer exists; its deletion was scheduled.
    RootDeleted,
    /// The root was invalidated in the cached tree before it could be examined.
    RootInvalidated,
}

/// Summary of one finished scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStats {
    pub full_scans: u64,
    pub partial_scans: u64,
    pub processed: u64,
    pub skipped: u64,
    pub wall: Duration,
    pub vfs_time: Duration,
    pub io_time: Duration,
    /// `None` when the scan ended with an error.
    pub outcome: Option<ScanOutcome>,
    pub recursive: bool,
}

impl RefreshStats {
    pub(crate) fn new(
        counters: &ScanCounters,
        wall: Duration,
        outcome: Option<ScanOutcome>,
        recursive: bool,
    ) -> Self {
        Self {
            full_scans: counters.full_scans,
            partial_scans: counters.partial_scans,
            processed: counters.processed,
            skipped: counters.skipped,
            wall,
            vfs_time: counters.vfs_time,
            io_time: counters.io_time,
            outcome,
            recursive,
        }
    }

    /// Directory passes that had to be repeated.
    pub fn retries(&self) -> u64 {
        (self.full_scans + self.partial_scans).saturating_sub(self.processed)
    }

    fn scope(&self) -> &'static str {
        if self.recursive {
            "recursive"
        } else {
            "flat"
        }
    }
}

/// Receives one [`RefreshStats`] per finished scan.
pub trait RefreshMetricsSink: Send + Sync {
    fn record_scan(&self, stats: &RefreshStats);
}

impl RefreshMetricsSink for MetricsRegistry {
    fn record_scan(&self, stats: &RefreshStats) {
        self.record_refresh_scan(
            stats.scope(),
            RefreshScanSample {
                full_scans: stats.full_scans,
                partial_scans: stats.partial_scans,
                retries: stats.retries(),
                skipped: stats.skipped,
                cancelled: stats.outcome == Some(ScanOutcome::Cancelled),
                wall: stats.wall,
                vfs_time: stats.vfs_time,
                io_time: stats.io_time,
            },
        );
    }
}

impl<S: RefreshMetricsSink + ?Sized> RefreshMetricsSink for &S {
    fn record_scan(&self, stats: &RefreshStats) {
        (**self).record_scan(stats)
    }
}

impl<S: RefreshMetricsSink + ?Sized> RefreshMetricsSink for Arc<S> {
    fn record_scan(&self, stats: &RefreshStats) {
        (**self).record_scan(stats)
    }
}
