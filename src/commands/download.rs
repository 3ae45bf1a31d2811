//! `deedpull download` - the staged download pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use deedpull_core::archive::{FsArchive, DEFAULT_UPLOAD_DEADLINE};
use deedpull_core::config::Settings;
use deedpull_core::optimize::{PdfOptimizer, DEFAULT_OPTIMIZE_TIMEOUT};
use deedpull_core::portal::{CourthouseClient, Portal, PortalRegistry};
use deedpull_core::queue::Stage;
use deedpull_core::scheduler::{PipelineStats, Scheduler, SchedulerConfig};
use deedpull_core::worker::WorkerContext;
use deedpull_core::RateLimiter;

use super::open_queue;

/// Runs the scheduler for a stage.
///
/// Returns `true` when the run was interrupted by the operator, so the
/// caller can exit 130.
pub async fn run_download(
    settings: &Settings,
    stage: Stage,
    workers: usize,
    dry_run: bool,
    resume: bool,
    show_progress: bool,
) -> Result<bool> {
    settings.ensure_directories()?;
    let queue = open_queue(settings, workers).await?;

    if dry_run {
        let pending = queue.count_stage_pending(stage).await?;
        let planned = stage.cap().map_or(pending, |cap| pending.min(cap));
        println!("Stage {stage} (dry run):");
        println!("  matching pending rows {pending:>10}");
        match stage.cap() {
            Some(cap) => println!("  stage cap             {cap:>10}"),
            None => println!("  stage cap               (none)"),
        }
        println!("  would process         {planned:>10}");
        return Ok(false);
    }

    tracing::debug!(
        bucket = %settings.gcs_bucket_name,
        credentials = settings.gcp_credentials_path.is_some(),
        archive_root = %settings.archive_dir.display(),
        "archive configuration"
    );

    let mut portals = PortalRegistry::new();
    for portal in [Portal::Historical, Portal::Mid] {
        let client = CourthouseClient::new(
            portal,
            &settings.portal_base_url,
            &settings.user_agent,
            settings.request_timeout,
        )
        .map_err(|e| anyhow::anyhow!("portal client construction failed: {e}"))?;
        portals.register(Arc::new(client));
    }

    let rate_limiter = if settings.rate_limit_delay.is_zero() {
        Arc::new(RateLimiter::disabled())
    } else {
        Arc::new(RateLimiter::new(settings.rate_limit_delay))
    };

    let ctx = WorkerContext {
        queue,
        portals: Arc::new(portals),
        optimizer: Arc::new(PdfOptimizer::new(
            settings.pdf_compression_quality,
            settings.pdf_dpi,
            DEFAULT_OPTIMIZE_TIMEOUT,
        )),
        archive: Arc::new(FsArchive::new(settings.archive_dir.clone())),
        rate_limiter,
        stats: Arc::new(PipelineStats::new()),
        temp_dir: settings.temp_download_dir.clone(),
        upload_deadline: DEFAULT_UPLOAD_DEADLINE,
    };

    // Cooperative shutdown: Ctrl-C stops new work; in-flight records reach
    // a terminal status before exit.
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_signal = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight records");
            interrupted_signal.store(true, Ordering::SeqCst);
        }
    });

    let mut config = SchedulerConfig::for_stage(stage, settings.checkpoint_dir.clone());
    config.workers = workers;
    config.resume = resume;
    config.show_progress = show_progress;

    let scheduler = Scheduler::new(config, ctx, Arc::clone(&interrupted))?;
    let snapshot = scheduler.run().await?;

    println!("Stage {stage} finished:");
    println!("  completed   {:>10}", snapshot.completed);
    println!("  failed      {:>10}", snapshot.failed);
    println!("  skipped     {:>10}", snapshot.skipped);
    println!("  mismatches  {:>10}", snapshot.mismatches);
    println!(
        "  bytes       {:>10} -> {} ({} saved)",
        snapshot.bytes_original,
        snapshot.bytes_optimized,
        snapshot.bytes_saved()
    );
    if !snapshot.by_portal.is_empty() {
        println!("  by portal:");
        for (portal, count) in &snapshot.by_portal {
            println!("    {portal:<12} {count:>8}");
        }
    }
    if !snapshot.errors.is_empty() {
        println!("  errors:");
        for (kind, count) in &snapshot.errors {
            println!("    {kind:<20} {count:>8}");
        }
    }

    let was_interrupted = interrupted.load(Ordering::SeqCst);
    if was_interrupted {
        info!("run interrupted; re-run with --resume to continue");
    }
    Ok(was_interrupted)
}
