//! Stage scheduler: fans records out across N workers.
//!
//! The scheduler owns the run loop: stale-claim recovery, batch fetching,
//! bounded fan-out through a semaphore, checkpointing, cap enforcement,
//! and cooperative shutdown. Workers are ordinary tasks processing one
//! record end-to-end; the only cross-worker coordination is the CAS claim
//! in the store, the shared rate limiter, and the stats accumulator.

mod checkpoint;
mod stats;

pub use checkpoint::{Checkpoint, CheckpointError, QueueState};
pub use stats::{PipelineStats, StatsSnapshot};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::queue::{QueueError, Stage, DEFAULT_STALE_MINUTES, MAX_ATTEMPTS};
use crate::worker::{process_record, WorkerContext};

/// Minimum allowed worker count.
const MIN_WORKERS: usize = 1;

/// Maximum allowed worker count.
const MAX_WORKERS: usize = 20;

/// Default worker count.
pub const DEFAULT_WORKERS: usize = 5;

/// Batch size per fetch, as a multiple of the worker count.
const BATCH_MULTIPLIER: usize = 10;

/// Completions between checkpoints.
const CHECKPOINT_EVERY: u64 = 100;

/// How often the run loop re-runs stale-claim recovery.
const STALE_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Error type for scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Invalid worker count provided.
    #[error("invalid worker count {value}: must be between {MIN_WORKERS} and {MAX_WORKERS}")]
    InvalidWorkers {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Queue operation failed.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Configuration for a scheduler run.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Stage to process.
    pub stage: Stage,
    /// Parallel worker count (1-20).
    pub workers: usize,
    /// Directory for checkpoint files.
    pub checkpoint_dir: PathBuf,
    /// Minutes before an `in_progress` claim counts as stale.
    pub stale_minutes: i64,
    /// Seed stats from the newest checkpoint for the stage.
    pub resume: bool,
    /// Draw a progress bar on stderr.
    pub show_progress: bool,
}

impl SchedulerConfig {
    /// Creates a config with defaults for everything but the stage.
    #[must_use]
    pub fn for_stage(stage: Stage, checkpoint_dir: PathBuf) -> Self {
        Self {
            stage,
            workers: DEFAULT_WORKERS,
            checkpoint_dir,
            stale_minutes: DEFAULT_STALE_MINUTES,
            resume: false,
            show_progress: false,
        }
    }
}

/// Stage scheduler over a worker context.
pub struct Scheduler {
    config: SchedulerConfig,
    ctx: WorkerContext,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    /// Creates a scheduler.
    ///
    /// # Arguments
    ///
    /// * `config` - Run configuration
    /// * `ctx` - Shared worker handles (queue, portals, optimizer, archive,
    ///   rate limiter, stats)
    /// * `shutdown` - Cooperative shutdown flag, typically set by a Ctrl-C
    ///   handler; observed between records, never mid-HTTP
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidWorkers`] if the worker count is
    /// outside 1-20.
    pub fn new(
        config: SchedulerConfig,
        ctx: WorkerContext,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, SchedulerError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&config.workers) {
            return Err(SchedulerError::InvalidWorkers {
                value: config.workers,
            });
        }

        debug!(
            stage = %config.stage,
            workers = config.workers,
            "creating scheduler"
        );

        Ok(Self {
            config,
            ctx,
            shutdown,
        })
    }

    /// Runs the stage to completion (or cap, or shutdown).
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Queue`] when the store becomes
    /// unreachable; individual record failures never error the run.
    #[instrument(skip(self), fields(stage = %self.config.stage))]
    pub async fn run(&self) -> Result<StatsSnapshot, SchedulerError> {
        let stage = self.config.stage;
        let queue = &self.ctx.queue;

        // Operator retry stage: move eligible failed rows back to pending
        // before the normal pending flow takes over.
        if stage == Stage::RetryFailed {
            let requeued = queue.requeue_failed(MAX_ATTEMPTS).await?;
            info!(requeued, "re-queued failed records for retry");
        }

        let reset = queue.reset_stale(self.config.stale_minutes).await?;
        if reset > 0 {
            info!(reset, "recovered stale in-progress records");
        }

        let mut last_fetched_id = self.load_resume_state();

        let cap = stage.cap();
        let total_pending = queue.count_stage_pending(stage).await?;
        let planned = cap.map_or(total_pending, |cap| total_pending.min(cap));
        info!(total_pending, ?cap, "starting stage run");

        let progress = self.make_progress_bar(planned);
        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let batch_size = (self.config.workers * BATCH_MULTIPLIER) as i64;

        let mut settled: u64 = 0;
        let mut last_checkpoint_at: u64 = 0;
        let mut last_stale_sweep = Instant::now();
        let mut resume_cursor = last_fetched_id;

        'run: loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!("shutdown requested; stopping before next batch");
                break;
            }

            if last_stale_sweep.elapsed() >= STALE_SWEEP_INTERVAL {
                let reset = queue.reset_stale(self.config.stale_minutes).await?;
                if reset > 0 {
                    info!(reset, "recovered stale in-progress records");
                }
                last_stale_sweep = Instant::now();
            }

            let remaining = cap.map(|cap| cap.saturating_sub(settled));
            if remaining == Some(0) {
                info!(settled, "stage cap reached");
                break;
            }
            let fetch_limit = remaining.map_or(batch_size, |r| {
                batch_size.min(i64::try_from(r).unwrap_or(batch_size))
            });

            let batch = queue
                .fetch_next_batch(stage, fetch_limit, resume_cursor)
                .await?;
            // The resume cursor only applies to the first fetch; afterwards
            // the store's own status transitions drive what comes back.
            resume_cursor = None;

            if batch.is_empty() {
                info!(settled, "queue drained for stage");
                break;
            }

            let mut tasks: JoinSet<()> = JoinSet::new();
            for doc in batch {
                if self.shutdown.load(Ordering::SeqCst) {
                    info!("shutdown requested; not submitting further records");
                    break;
                }

                last_fetched_id = Some(last_fetched_id.unwrap_or(0).max(doc.id));

                let permit = Arc::clone(&semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|_| SchedulerError::SemaphoreClosed)?;
                let ctx = self.ctx.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    process_record(&ctx, &doc).await;
                });
            }

            // Drain the batch; task panics are logged, never fatal.
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "worker task panicked");
                }
                settled += 1;
                progress.inc(1);

                if settled - last_checkpoint_at >= CHECKPOINT_EVERY {
                    self.write_checkpoint(last_fetched_id);
                    last_checkpoint_at = settled;
                }

                if cap.is_some_and(|cap| settled >= cap) {
                    // Cap reached with work still queued locally: wait for
                    // in-flight tasks, then exit.
                    while let Some(joined) = tasks.join_next().await {
                        if let Err(e) = joined {
                            warn!(error = %e, "worker task panicked");
                        }
                        settled += 1;
                        progress.inc(1);
                    }
                    info!(settled, "stage cap reached");
                    break 'run;
                }
            }

            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
        }

        progress.finish_and_clear();
        self.write_checkpoint(last_fetched_id);

        let snapshot = self.ctx.stats.snapshot();
        info!(
            completed = snapshot.completed,
            failed = snapshot.failed,
            skipped = snapshot.skipped,
            mismatches = snapshot.mismatches,
            bytes_saved = snapshot.bytes_saved(),
            "stage run finished"
        );

        Ok(snapshot)
    }

    /// Loads resume state: seeds stats and returns the stored cursor.
    fn load_resume_state(&self) -> Option<i64> {
        if !self.config.resume {
            return None;
        }

        match Checkpoint::load_latest(&self.config.checkpoint_dir, self.config.stage) {
            Ok(Some(checkpoint)) => {
                info!(
                    timestamp = %checkpoint.timestamp,
                    completed = checkpoint.statistics.completed,
                    "resuming from checkpoint"
                );
                let cursor = checkpoint.queue_state.last_fetched_id;
                self.ctx.stats.restore(checkpoint.statistics);
                cursor
            }
            Ok(None) => {
                info!("no checkpoint found for stage; starting fresh");
                None
            }
            Err(e) => {
                warn!(error = %e, "failed to load checkpoint; starting fresh");
                None
            }
        }
    }

    /// Writes a checkpoint; failures are logged and the run continues.
    fn write_checkpoint(&self, last_fetched_id: Option<i64>) {
        let checkpoint = Checkpoint::new(
            self.config.stage,
            last_fetched_id,
            self.ctx.stats.snapshot(),
        );
        if let Err(e) = checkpoint.write(&self.config.checkpoint_dir) {
            error!(error = %e, "failed to write checkpoint");
        }
    }

    fn make_progress_bar(&self, planned: u64) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new(planned);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_defaults() {
        let config = SchedulerConfig::for_stage(Stage::Test, PathBuf::from("/tmp/ckpt"));
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.stale_minutes, DEFAULT_STALE_MINUTES);
        assert!(!config.resume);
    }

    #[test]
    fn test_default_workers_in_bounds() {
        assert!((MIN_WORKERS..=MAX_WORKERS).contains(&DEFAULT_WORKERS));
    }

    // Scheduler construction and full runs are covered in
    // tests/pipeline_integration.rs where a real WorkerContext exists.
}
