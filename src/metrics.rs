//! Metrics and observability for sqlite-supasync.
//!
//! Counters are kept locally (for the CLI's JSON summary) and mirrored to
//! the `metrics` facade so an installed recorder can export them.

use std::sync::atomic::{AtomicU64, Ordering};

use std::time::Instant;

/// Metrics collector for sync operations.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Total runs attempted
    pub runs_total: AtomicU64,
    /// Successful runs
    pub runs_success: AtomicU64,
    /// Failed runs
    pub runs_failed: AtomicU64,
    /// Source rows read
    pub records_read: AtomicU64,
    /// Records inserted at the sink
    pub records_inserted: AtomicU64,
    /// Records skipped because the key already existed
    pub records_skipped: AtomicU64,
    /// Batches flushed
    pub batches_flushed: AtomicU64,
    /// Retried insert attempts
    pub retries: AtomicU64,
    /// Failed existing-key fetches
    pub dedup_failures: AtomicU64,
    /// Total run duration in milliseconds
    pub sync_duration_ms: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished run.
    pub fn record_run(&self, success: bool, duration_ms: u64) {
        self.runs_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.runs_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.runs_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.sync_duration_ms
            .fetch_add(duration_ms, Ordering::Relaxed);

        let outcome = if success { "success" } else { "failure" };
        metrics::counter!("supasync_runs_total", "outcome" => outcome).increment(1);
        metrics::histogram!("supasync_run_duration_ms").record(duration_ms as f64);
    }

    /// Record rows read from the source, and how many were skipped.
    pub fn record_read(&self, read: u64, skipped: u64) {
        self.records_read.fetch_add(read, Ordering::Relaxed);
        self.records_skipped.fetch_add(skipped, Ordering::Relaxed);
        metrics::counter!("supasync_records_read_total").increment(read);
        metrics::counter!("supasync_records_skipped_total").increment(skipped);
    }

    /// Record a flushed batch.
    pub fn record_batch(&self, records: u64) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.records_inserted.fetch_add(records, Ordering::Relaxed);
        metrics::counter!("supasync_batches_total").increment(1);
        metrics::counter!("supasync_records_inserted_total").increment(records);
    }

    /// Record retried attempts.
    pub fn record_retries(&self, retries: u64) {
        if retries == 0 {
            return;
        }
        self.retries.fetch_add(retries, Ordering::Relaxed);
        metrics::counter!("supasync_retries_total").increment(retries);
    }

    /// Record a failed existing-key fetch.
    pub fn record_dedup_failure(&self) {
        self.dedup_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("supasync_dedup_failures_total").increment(1);
    }

    /// Get snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs_total: self.runs_total.load(Ordering::Relaxed),
            runs_success: self.runs_success.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            records_read: self.records_read.load(Ordering::Relaxed),
            records_inserted: self.records_inserted.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            dedup_failures: self.dedup_failures.load(Ordering::Relaxed),
            sync_duration_ms: self.sync_duration_ms.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Total runs attempted
    pub runs_total: u64,
    /// Successful runs
    pub runs_success: u64,
    /// Failed runs
    pub runs_failed: u64,
    /// Source rows read
    pub records_read: u64,
    /// Records inserted at the sink
    pub records_inserted: u64,
    /// Records skipped because the key already existed
    pub records_skipped: u64,
    /// Batches flushed
    pub batches_flushed: u64,
    /// Retried insert attempts
    pub retries: u64,
    /// Failed existing-key fetches
    pub dedup_failures: u64,
    /// Total run duration in milliseconds
    pub sync_duration_ms: u64,
}

impl MetricsSnapshot {
    /// Average records per flushed batch.
    pub fn avg_batch_size(&self) -> f64 {
        if self.batches_flushed == 0 {
            0.0
        } else {
            self.records_inserted as f64 / self.batches_flushed as f64
        }
    }

    /// Calculate records per second.
    pub fn records_per_second(&self) -> f64 {
        if self.sync_duration_ms == 0 {
            0.0
        } else {
            (self.records_inserted as f64 * 1000.0) / self.sync_duration_ms as f64
        }
    }
}

/// Timer for measuring operation duration.
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    /// Start a new timer.
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    /// Get elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Stop timer and log duration.
    pub fn stop(self) -> u64 {
        let elapsed = self.elapsed_ms();
        tracing::debug!("{} completed in {}ms", self.label, elapsed);
        elapsed
    }
}
