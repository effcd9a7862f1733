use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;
use std::time::Duration;

// We record latencies in microseconds.
const LATENCY_SIGFIG: u8 = 3;
// A refresh of a huge tree over a slow network mount can take minutes. Values above this are
// clamped.
const MAX_LATENCY_US: u64 = 10 * 60 * 1_000_000;

/// One finished refresh scan, as reported by a refresh worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshScanSample {
    pub full_scans: u64,
    pub partial_scans: u64,
    /// Directory passes that were rolled back because the cached snapshot drifted.
    pub retries: u64,
    /// Directories skipped because they were invalidated or kept failing to list.
    pub skipped: u64,
    pub cancelled: bool,
    pub wall: Duration,
    /// Time spent snapshotting the cached tree under its read lock.
    pub vfs_time: Duration,
    /// Time spent in file system calls.
    pub io_time: Duration,
}

/// Thread-safe refresh metrics registry (counters + per-scope latency histograms).
///
/// Scopes are short static labels chosen by the reporter (e.g. `recursive` / `flat`). Recording a
/// sample is a single mutex acquisition and no allocations on the hot path after a scope is first
/// seen.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    scopes: HashMap<String, ScopeMetrics>,
}

#[derive(Debug)]
struct ScopeMetrics {
    scan_count: u64,
    cancelled_count: u64,
    full_scans: u64,
    partial_scans: u64,
    retries: u64,
    skipped: u64,
    wall_us: Histogram<u64>,
    vfs_us: Histogram<u64>,
    io_us: Histogram<u64>,
}

fn new_latency_histogram() -> Histogram<u64> {
    static HISTOGRAM_BOUNDS_ERROR_LOGGED: OnceLock<()> = OnceLock::new();

    Histogram::<u64>::new_with_bounds(1, MAX_LATENCY_US, LATENCY_SIGFIG).unwrap_or_else(|err| {
        if HISTOGRAM_BOUNDS_ERROR_LOGGED.set(()).is_ok() {
            tracing::debug!(
                target = "nova.metrics",
                error = %err,
                "failed to construct bounded latency histogram; falling back to unbounded histogram"
            );
        }
        // hdrhistogram only errors for invalid bounds/precision; the default constructor with a
        // valid precision always succeeds.
        Histogram::<u64>::new(LATENCY_SIGFIG).expect("histogram")
    })
}

fn to_micros(duration: Duration) -> u64 {
    let micros = duration.as_micros().min(u128::from(MAX_LATENCY_US)) as u64;
    micros.max(1)
}

impl ScopeMetrics {
    fn new() -> Self {
        Self {
            scan_count: 0,
            cancelled_count: 0,
            full_scans: 0,
            partial_scans: 0,
            retries: 0,
            skipped: 0,
            wall_us: new_latency_histogram(),
            vfs_us: new_latency_histogram(),
            io_us: new_latency_histogram(),
        }
    }

    fn record(&mut self, scope: &str, sample: &RefreshScanSample) {
        static HISTOGRAM_RECORD_ERROR_LOGGED: OnceLock<()> = OnceLock::new();

        self.scan_count = self.scan_count.saturating_add(1);
        if sample.cancelled {
            self.cancelled_count = self.cancelled_count.saturating_add(1);
        }
        self.full_scans = self.full_scans.saturating_add(sample.full_scans);
        self.partial_scans = self.partial_scans.saturating_add(sample.partial_scans);
        self.retries = self.retries.saturating_add(sample.retries);
        self.skipped = self.skipped.saturating_add(sample.skipped);

        for (hist, duration) in [
            (&mut self.wall_us, sample.wall),
            (&mut self.vfs_us, sample.vfs_time),
            (&mut self.io_us, sample.io_time),
        ] {
            let micros = to_micros(duration);
            if let Err(err) = hist.record(micros) {
                if HISTOGRAM_RECORD_ERROR_LOGGED.set(()).is_ok() {
                    tracing::debug!(
                        target = "nova.metrics",
                        scope,
                        micros,
                        error = %err,
                        "failed to record latency sample"
                    );
                }
            }
        }
    }
}

impl MetricsRegistry {
    /// Returns the global metrics registry.
    pub fn global() -> &'static MetricsRegistry {
        static GLOBAL: OnceLock<MetricsRegistry> = OnceLock::new();
        GLOBAL.get_or_init(MetricsRegistry::default)
    }

    /// Record a finished refresh scan under `scope`.
    pub fn record_refresh_scan(&self, scope: &str, sample: RefreshScanSample) {
        let mut inner = self.inner.lock();
        inner
            .scopes
            .entry(scope.to_owned())
            .or_insert_with(ScopeMetrics::new)
            .record(scope, &sample);
    }

    /// Reset all recorded metrics.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.scopes.clear();
    }

    /// Create a snapshot of all recorded metrics suitable for debug export.
    pub fn snapshot(&self) -> MetricsSnapshot {
        static TOTAL_HISTOGRAM_ADD_ERROR_LOGGED: OnceLock<()> = OnceLock::new();

        let inner = self.inner.lock();

        let mut scopes = BTreeMap::new();
        let mut totals = ScopeTotals::default();
        let mut total_wall = new_latency_histogram();

        for (scope, metrics) in inner.scopes.iter() {
            totals.add(metrics);

            if let Err(err) = total_wall.add(&metrics.wall_us) {
                if TOTAL_HISTOGRAM_ADD_ERROR_LOGGED.set(()).is_ok() {
                    tracing::debug!(
                        target = "nova.metrics",
                        scope,
                        error = %err,
                        "failed to merge per-scope latency histogram into totals"
                    );
                }
            }

            scopes.insert(
                scope.clone(),
                ScopeMetricsSnapshot {
                    scan_count: metrics.scan_count,
                    cancelled_count: metrics.cancelled_count,
                    full_scans: metrics.full_scans,
                    partial_scans: metrics.partial_scans,
                    retries: metrics.retries,
                    skipped: metrics.skipped,
                    wall_us: latency_summary(&metrics.wall_us),
                    vfs_us: latency_summary(&metrics.vfs_us),
                    io_us: latency_summary(&metrics.io_us),
                },
            );
        }

        MetricsSnapshot {
            totals: totals.into_snapshot(latency_summary(&total_wall)),
            scopes,
        }
    }
}

#[derive(Default)]
struct ScopeTotals {
    scan_count: u64,
    cancelled_count: u64,
    full_scans: u64,
    partial_scans: u64,
    retries: u64,
    skipped: u64,
}

impl ScopeTotals {
    fn add(&mut self, metrics: &ScopeMetrics) {
        self.scan_count = self.scan_count.saturating_add(metrics.scan_count);
        self.cancelled_count = self.cancelled_count.saturating_add(metrics.cancelled_count);
        self.full_scans = self.full_scans.saturating_add(metrics.full_scans);
        self.partial_scans = self.partial_scans.saturating_add(metrics.partial_scans);
        self.retries = self.retries.saturating_add(metrics.retries);
        self.skipped = self.skipped.saturating_add(metrics.skipped);
    }

    fn into_snapshot(self, wall_us: LatencySummary) -> TotalsSnapshot {
        TotalsSnapshot {
            scan_count: self.scan_count,
            cancelled_count: self.cancelled_count,
            full_scans: self.full_scans,
            partial_scans: self.partial_scans,
            retries: self.retries,
            skipped: self.skipped,
            wall_us,
        }
    }
}

fn latency_summary(hist: &Histogram<u64>) -> LatencySummary {
    if hist.is_empty() {
        return LatencySummary {
            p50_us: 0,
            p95_us: 0,
            max_us: 0,
        };
    }

    LatencySummary {
        p50_us: hist.value_at_quantile(0.50),
        p95_us: hist.value_at_quantile(0.95),
        max_us: hist.max(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub totals: TotalsSnapshot,
    pub scopes: BTreeMap<String, ScopeMetricsSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalsSnapshot {
    pub scan_count: u64,
    pub cancelled_count: u64,
    pub full_scans: u64,
    pub partial_scans: u64,
    pub retries: u64,
    pub skipped: u64,
    pub wall_us: LatencySummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeMetricsSnapshot {
    pub scan_count: u64,
    pub cancelled_count: u64,
    pub full_scans: u64,
    pub partial_scans: u64,
    pub retries: u64,
    pub skipped: u64,
    pub wall_us: LatencySummary,
    pub vfs_us: LatencySummary,
    pub io_us: LatencySummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySummary {
    pub p50_us: u64,
    pub p95_us: u64,
    pub max_us: u64,
}
