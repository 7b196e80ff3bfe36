//! Core sync logic for sqlite-supasync.
//!
//! One run walks `Init -> DedupLoaded -> Streaming -> Flushing* -> Done`;
//! any fatal error moves it to `Failed` and ends the run. Records are read
//! in source order, filtered against the key set loaded once at the start,
//! and inserted in batches of `batch_size`. Every flush, including the last
//! partial one, goes through the same [`RetryPolicy`].

use crate::config::{DedupFailurePolicy, SyncBehaviorConfig, SyncConfig};
use crate::error::{Error, Result};
use crate::metrics::{Metrics, Timer};
use crate::record::{ExistingKeySet, Record};
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper};
use crate::source::RowSource;
use crate::supabase::{InsertMode, RowSink};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Sync result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    /// Source table name
    pub source_table: String,
    /// Target table name
    pub target_table: String,
    /// Rows read from the source
    pub records_read: usize,
    /// Rows skipped because their key already existed at the sink
    pub records_skipped: usize,
    /// Rows inserted (or, in a dry run, rows that would have been)
    pub records_inserted: usize,
    /// Batches flushed
    pub batches_flushed: usize,
    /// Retried insert attempts
    pub retries: u32,
    /// Size of the key set loaded at the start
    pub existing_keys: usize,
    /// The key set could not be loaded and the run went ahead without it;
    /// rows already at the sink were sent again with duplicates ignored
    pub dedup_degraded: bool,
    /// No inserts were performed
    pub dry_run: bool,
    /// Total duration in milliseconds
    pub duration_ms: u64,
    /// Timestamp when sync completed
    pub completed_at: String,
}

impl SyncResult {
    /// Get total records synced.
    pub fn total_records(&self) -> usize {
        self.records_inserted
    }
}

/// Sync progress callback.
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

/// Sync progress update.
#[derive(Debug, Clone)]
pub struct SyncProgress {
    /// Source table being synced
    pub table: String,
    /// Current phase
    pub phase: SyncPhase,
    /// Rows read so far
    pub records_read: usize,
    /// Rows inserted so far (running total)
    pub records_inserted: usize,
    /// Total source rows (if known)
    pub total_records: Option<u64>,
    /// Percentage of source rows read (0-100)
    pub percent: u8,
}

/// Sync phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Checking the sink table
    Init,
    /// Existing keys loaded
    DedupLoaded,
    /// Reading and filtering source rows
    Streaming,
    /// A batch was flushed
    Flushing,
    /// Completed
    Done,
    /// Failed
    Failed,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPhase::Init => write!(f, "init"),
            SyncPhase::DedupLoaded => write!(f, "dedup-loaded"),
            SyncPhase::Streaming => write!(f, "streaming"),
            SyncPhase::Flushing => write!(f, "flushing"),
            SyncPhase::Done => write!(f, "done"),
            SyncPhase::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Default)]
struct RunStats {
    records_read: usize,
    records_skipped: usize,
    records_inserted: usize,
    batches_flushed: usize,
    retries: u32,
    existing_keys: usize,
    dedup_degraded: bool,
    total_records: Option<u64>,
}

impl RunStats {
    fn percent(&self) -> u8 {
        match self.total_records {
            Some(0) => 100,
            Some(total) => ((self.records_read as u64 * 100) / total).min(100) as u8,
            None => 0,
        }
    }
}

/// Batch synchronization driver.
///
/// Source, sink and sleeper are passed in, so tests can substitute any of
/// them.
pub struct SyncDriver<S, K, C = TokioSleeper> {
    source: S,
    sink: K,
    sleeper: C,
    behavior: SyncBehaviorConfig,
    primary_key: String,
    retry: RetryPolicy,
    metrics: Arc<Metrics>,
    progress_callback: Option<Arc<ProgressCallback>>,
}

impl<S, K> SyncDriver<S, K, TokioSleeper>
where
    S: RowSource,
    K: RowSink,
{
    /// Create a driver that sleeps on the tokio timer between retries.
    pub fn new(source: S, sink: K, config: &SyncConfig) -> Self {
        Self {
            source,
            sink,
            sleeper: TokioSleeper,
            behavior: config.sync.clone(),
            primary_key: config.supabase.primary_key.clone(),
            retry: RetryPolicy::new(config.retry.clone()),
            metrics: Arc::new(Metrics::new()),
            progress_callback: None,
        }
    }
}

impl<S, K, C> SyncDriver<S, K, C>
where
    S: RowSource,
    K: RowSink,
    C: Sleeper,
{
    /// Replace the sleeper used between retries.
    pub fn with_sleeper<C2: Sleeper>(self, sleeper: C2) -> SyncDriver<S, K, C2> {
        SyncDriver {
            source: self.source,
            sink: self.sink,
            sleeper,
            behavior: self.behavior,
            primary_key: self.primary_key,
            retry: self.retry,
            metrics: self.metrics,
            progress_callback: self.progress_callback,
        }
    }

    /// Set progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(SyncProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(Box::new(callback)));
        self
    }

    /// Share a metrics collector.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Metrics collected by this driver.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Run one sync. The source is consumed; a second call reads nothing.
    #[instrument(skip(self), fields(source = %self.source.table(), target = %self.sink.table()))]
    pub async fn run(&mut self) -> Result<SyncResult> {
        let timer = Timer::start("sync run");
        let mut stats = RunStats::default();

        let outcome = self.execute(&mut stats).await;
        let duration_ms = timer.stop();

        self.metrics
            .record_read(stats.records_read as u64, stats.records_skipped as u64);

        match outcome {
            Ok(()) => {
                self.metrics.record_run(true, duration_ms);
                self.report(SyncPhase::Done, &stats);

                let result = SyncResult {
                    source_table: self.source.table().to_string(),
                    target_table: self.sink.table().to_string(),
                    records_read: stats.records_read,
                    records_skipped: stats.records_skipped,
                    records_inserted: stats.records_inserted,
                    batches_flushed: stats.batches_flushed,
                    retries: stats.retries,
                    existing_keys: stats.existing_keys,
                    dedup_degraded: stats.dedup_degraded,
                    dry_run: self.behavior.dry_run,
                    duration_ms,
                    completed_at: chrono::Utc::now().to_rfc3339(),
                };

                info!(
                    "Sync completed in {}ms. Read: {}, skipped: {}, inserted: {}",
                    duration_ms, result.records_read, result.records_skipped, result.records_inserted
                );
                Ok(result)
            }
            Err(e) => {
                self.metrics.record_run(false, duration_ms);
                self.report(SyncPhase::Failed, &stats);
                error!(
                    code = e.code(),
                    "Sync failed after inserting {} records: {}", stats.records_inserted, e
                );
                Err(e)
            }
        }
    }

    async fn execute(&mut self, stats: &mut RunStats) -> Result<()> {
        self.report(SyncPhase::Init, stats);
        self.sink.ensure_table_exists().await?;
        info!("Table exists in Supabase, proceeding with data load...");

        let existing = self.load_existing_keys(stats).await?;
        self.report(SyncPhase::DedupLoaded, stats);

        stats.total_records = match self.source.row_count() {
            Ok(count) => Some(count),
            Err(e) => {
                debug!("Row count unavailable: {}", e);
                None
            }
        };

        let batch_size = self.behavior.batch_size;
        let mut batch: Vec<Record> = Vec::with_capacity(batch_size);

        self.report(SyncPhase::Streaming, stats);
        loop {
            let rows = self.source.next_rows(batch_size)?;
            if rows.is_empty() {
                break;
            }

            for record in rows {
                stats.records_read += 1;

                let key = record.key(&self.primary_key)?;
                if existing.contains(&key) {
                    stats.records_skipped += 1;
                    continue;
                }

                batch.push(record);
                if batch.len() >= batch_size {
                    self.flush(&mut batch, stats).await?;
                }
            }
        }

        if !batch.is_empty() {
            self.flush(&mut batch, stats).await?;
        }

        Ok(())
    }

    async fn load_existing_keys(&self, stats: &mut RunStats) -> Result<ExistingKeySet> {
        match self.sink.existing_keys().await {
            Ok(keys) => {
                stats.existing_keys = keys.len();
                Ok(keys)
            }
            Err(e) => match self.behavior.on_dedup_failure {
                DedupFailurePolicy::Proceed => {
                    self.metrics.record_dedup_failure();
                    stats.dedup_degraded = true;
                    warn!(
                        code = e.code(),
                        "Could not fetch existing keys ({}); continuing without dedup, \
                         rows already in {} may be sent again",
                        e,
                        self.sink.table()
                    );
                    Ok(ExistingKeySet::new())
                }
                DedupFailurePolicy::Abort => Err(e),
            },
        }
    }

    async fn flush(&self, batch: &mut Vec<Record>, stats: &mut RunStats) -> Result<()> {
        let size = batch.len();

        if self.behavior.dry_run {
            info!("Dry run: would insert {} records", size);
        } else {
            let timer = Timer::start(format!("insert of {} records", size));
            let records = batch.as_slice();
            let sink = &self.sink;
            // Without a key set, rows already at the sink are expected.
            let mode = if stats.dedup_degraded {
                InsertMode::IgnoreDuplicates
            } else {
                InsertMode::Strict
            };

            let outcome = self
                .retry
                .run(&self.sleeper, "batch insert", || sink.insert_batch(records, mode))
                .await;
            timer.stop();

            match outcome {
                Ok(retried) => {
                    stats.retries += retried.retries();
                    self.metrics.record_retries(retried.retries() as u64);
                }
                Err(e) => {
                    if let Error::RetryExhausted { attempts, .. } = &e {
                        let retries = attempts.saturating_sub(1);
                        stats.retries += retries;
                        self.metrics.record_retries(retries as u64);
                    }
                    return Err(Error::sync(
                        format!("batch of {} records was not inserted: {}", size, e),
                        stats.records_inserted,
                    ));
                }
            }

            self.metrics.record_batch(size as u64);
        }

        stats.records_inserted += size;
        stats.batches_flushed += 1;
        batch.clear();

        info!("Processed {} records", stats.records_inserted);
        self.report(SyncPhase::Flushing, stats);
        Ok(())
    }

    /// Report progress via callback.
    fn report(&self, phase: SyncPhase, stats: &RunStats) {
        if let Some(ref callback) = self.progress_callback {
            callback(SyncProgress {
                table: self.source.table().to_string(),
                phase,
                records_read: stats.records_read,
                records_inserted: stats.records_inserted,
                total_records: stats.total_records,
                percent: stats.percent(),
            });
        }
    }
}
