//! Per-record download pipeline.
//!
//! One worker invocation takes a candidate row end-to-end: claim it via
//! the CAS, fetch the PDF from its portal, validate the locator the server
//! reports, optimize, archive, and settle the status. Every failure is
//! classified into a typed [`ErrorKind`] whose policy decides between
//! re-queueing and terminal states - the worker never panics the
//! scheduler.

mod policy;

pub use policy::{ErrorKind, ErrorPolicy, WorkerFailure};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::archive::{remote_path_for, upload_with_retry, ArchiveMetadata, ObjectArchive};
use crate::index::{resolve_document_code, IndexDocument};
use crate::optimize::PdfOptimizer;
use crate::portal::{route_book, DocumentLookup, FetchError, FetchResult, Portal, PortalRegistry};
use crate::queue::{Queue, REASON_EXCLUDED_PORTAL};
use crate::rate_limit::RateLimiter;
use crate::scheduler::PipelineStats;

/// Shared handles a worker needs to process records.
///
/// Cloned into every spawned task; all members are cheap handles over
/// pooled or shared state.
#[derive(Clone)]
pub struct WorkerContext {
    /// Queue over the index store.
    pub queue: Queue,
    /// Per-portal clients.
    pub portals: Arc<PortalRegistry>,
    /// PDF optimizer.
    pub optimizer: Arc<PdfOptimizer>,
    /// Object archive.
    pub archive: Arc<dyn ObjectArchive>,
    /// Process-wide request spacing.
    pub rate_limiter: Arc<RateLimiter>,
    /// Shared statistics accumulator.
    pub stats: Arc<PipelineStats>,
    /// Scratch directory for downloaded files.
    pub temp_dir: PathBuf,
    /// Overall deadline for the archive upload.
    pub upload_deadline: Duration,
}

/// How a record's processing ended, for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Settled as completed.
    Completed,
    /// Settled as failed (possibly re-queued for retry), keyed by kind.
    Failed(&'static str),
    /// Settled as skipped, keyed by kind.
    Skipped(&'static str),
    /// Another worker claimed the record first; nothing was done.
    ClaimLost,
}

/// Everything a successful pipeline run produces for settling.
struct Completion {
    portal: Portal,
    uri: String,
    actual_book: Option<i64>,
    actual_page: Option<i64>,
    mismatch: bool,
    original_size: u64,
    optimized_size: u64,
}

/// Processes one candidate record end-to-end.
///
/// Always settles the record in the store (or loses the claim silently);
/// errors are absorbed into the returned outcome and the shared stats.
#[instrument(skip(ctx, doc), fields(id = doc.id, book = ?doc.book, page = ?doc.page))]
pub async fn process_record(ctx: &WorkerContext, doc: &IndexDocument) -> RecordOutcome {
    // Claim first: losing the CAS means another worker owns the record.
    match ctx.queue.mark_in_progress(doc.id).await {
        Ok(true) => {}
        Ok(false) => {
            debug!("claim lost to another worker");
            ctx.stats.record_claim_lost();
            return RecordOutcome::ClaimLost;
        }
        Err(e) => {
            warn!(error = %e, "failed to claim record");
            ctx.stats.record_failed(ErrorKind::DbError.key());
            return RecordOutcome::Failed(ErrorKind::DbError.key());
        }
    }

    match run_pipeline(ctx, doc).await {
        Ok(completion) => settle_completed(ctx, doc.id, &completion).await,
        Err(failure) => settle_failed(ctx, doc.id, &failure).await,
    }
}

/// Runs fetch → validate → optimize → archive for a claimed record.
async fn run_pipeline(ctx: &WorkerContext, doc: &IndexDocument) -> Result<Completion, WorkerFailure> {
    let (book, page) = match (doc.book, doc.page) {
        (Some(book), Some(page)) if book > 0 && page > 0 => (book, page),
        _ => {
            return Err(WorkerFailure::new(
                ErrorKind::InvalidRecord,
                "record has no usable book/page locator",
            ));
        }
    };

    let Some(portal) = route_book(book) else {
        return Err(WorkerFailure::new(
            ErrorKind::InvalidRecord,
            format!("book {book} cannot be routed"),
        ));
    };
    let Some(client) = ctx.portals.get(portal) else {
        return Err(WorkerFailure::new(
            ErrorKind::ExcludedPortal,
            REASON_EXCLUDED_PORTAL,
        ));
    };

    ctx.rate_limiter.acquire().await;

    let doc_code = portal_code_for(doc);
    let fetched = fetch_with_fallback(client.as_ref(), doc, book, page, &doc_code).await?;

    let actual_book = fetched.metadata.actual_book;
    let actual_page = fetched.metadata.actual_page;
    let mismatch = match (actual_book, actual_page) {
        (Some(actual_book), Some(actual_page)) => actual_book != book || actual_page != page,
        _ => false,
    };
    if mismatch {
        // Data-quality signal, not a failure: the archive keys off the
        // index locator and the server's view is recorded alongside.
        warn!(
            book,
            page, actual_book, actual_page, "portal reports different book/page"
        );
    }

    let temp_path = ctx.temp_dir.join(format!("{book:04}-{page:04}.pdf"));
    let result = download_optimize_upload(ctx, doc, book, page, &fetched, &temp_path).await;

    // Step-local scratch is always removed, success or not.
    if temp_path.exists() {
        if let Err(e) = std::fs::remove_file(&temp_path) {
            warn!(path = %temp_path.display(), error = %e, "failed to remove temp file");
        }
    }

    let (uri, original_size, optimized_size) = result?;

    Ok(Completion {
        portal,
        uri,
        actual_book,
        actual_page,
        mismatch,
        original_size,
        optimized_size,
    })
}

/// Writes, optimizes and archives the fetched bytes.
async fn download_optimize_upload(
    ctx: &WorkerContext,
    doc: &IndexDocument,
    book: i64,
    page: i64,
    fetched: &FetchResult,
    temp_path: &std::path::Path,
) -> Result<(String, u64, u64), WorkerFailure> {
    std::fs::write(temp_path, &fetched.pdf_bytes).map_err(|e| {
        WorkerFailure::new(
            ErrorKind::OptimizerFailure,
            format!("failed to write scratch file {}: {e}", temp_path.display()),
        )
    })?;

    let report = ctx
        .optimizer
        .optimize_in_place(temp_path)
        .await
        .map_err(|e| WorkerFailure::new(ErrorKind::OptimizerFailure, e.to_string()))?;
    if report.used_fallback {
        // Soft by contract: unoptimized bytes are still archived.
        ctx.stats.record_soft_error(ErrorKind::OptimizerFailure.key());
    }

    let remote_path = remote_path_for(book, page, doc.document_type.as_deref());
    let metadata = ArchiveMetadata::new(
        book,
        page,
        doc.instrument_number,
        doc.document_type.as_deref(),
        doc.instrument_type_parsed.as_deref(),
        report.original_size,
        report.optimized_size,
    );

    let outcome = upload_with_retry(
        ctx.archive.as_ref(),
        temp_path,
        &remote_path,
        &metadata,
        ctx.upload_deadline,
    )
    .await?;

    Ok((outcome.uri, report.original_size, report.optimized_size))
}

/// Fetches the document, preferring instrument-number lookup.
///
/// When the instrument lookup fails in a way a different key might fix
/// (no such record, no link, unparseable result), the legacy book/page
/// lookup runs once as a fallback. Transport errors propagate directly -
/// the record-level retry handles those.
async fn fetch_with_fallback(
    client: &dyn crate::portal::PortalClient,
    doc: &IndexDocument,
    book: i64,
    page: i64,
    doc_code: &str,
) -> Result<FetchResult, WorkerFailure> {
    let Some(instrument) = doc.instrument_number.filter(|n| *n > 0) else {
        return client
            .fetch(&DocumentLookup::by_book_page(book, page, doc_code))
            .await
            .map_err(WorkerFailure::from);
    };

    match client
        .fetch(&DocumentLookup::by_instrument(instrument, doc_code))
        .await
    {
        Ok(result) => Ok(result),
        Err(
            error @ (FetchError::NotFound { .. }
            | FetchError::NoImageAvailable { .. }
            | FetchError::ParseError { .. }
            | FetchError::InvalidResponse { .. }),
        ) => {
            debug!(
                instrument,
                error = %error,
                "instrument lookup failed; falling back to book/page"
            );
            client
                .fetch(&DocumentLookup::by_book_page(book, page, doc_code))
                .await
                .map_err(WorkerFailure::from)
        }
        Err(error) => Err(WorkerFailure::from(error)),
    }
}

/// Chooses the portal document-class code for a record.
///
/// The parsed instrument type wins; otherwise a deed-of-trust book volume
/// selects the DEED OF TRUST code, and everything else searches as DEED.
fn portal_code_for(doc: &IndexDocument) -> String {
    if doc.instrument_type_parsed.is_some() {
        return resolve_document_code(doc.instrument_type_parsed.as_deref()).to_string();
    }
    let is_trust_volume = doc
        .book_volume
        .as_deref()
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("DT"));
    if is_trust_volume {
        "02".to_string()
    } else {
        resolve_document_code(None).to_string()
    }
}

/// Settles a successful run and records stats.
async fn settle_completed(ctx: &WorkerContext, id: i64, completion: &Completion) -> RecordOutcome {
    if let Err(e) = ctx
        .queue
        .mark_completed(
            id,
            &completion.uri,
            completion.actual_book,
            completion.actual_page,
            completion.mismatch,
        )
        .await
    {
        warn!(id, error = %e, "failed to mark record completed");
        ctx.stats.record_failed(ErrorKind::DbError.key());
        return RecordOutcome::Failed(ErrorKind::DbError.key());
    }

    info!(
        id,
        uri = %completion.uri,
        original_size = completion.original_size,
        optimized_size = completion.optimized_size,
        "record archived"
    );
    ctx.stats.record_completed(
        completion.portal,
        completion.original_size,
        completion.optimized_size,
        completion.mismatch,
    );
    RecordOutcome::Completed
}

/// Settles a failed run per the policy table and records stats.
async fn settle_failed(ctx: &WorkerContext, id: i64, failure: &WorkerFailure) -> RecordOutcome {
    let policy = failure.kind.policy();
    let key = failure.kind.key();

    let settle = if policy.skip {
        ctx.queue.mark_skipped(id, &failure.message).await
    } else {
        ctx.queue
            .mark_failed(id, &failure.message, policy.retry)
            .await
    };

    if let Err(e) = settle {
        warn!(id, error = %e, "failed to settle record after failure");
        ctx.stats.record_failed(ErrorKind::DbError.key());
        return RecordOutcome::Failed(ErrorKind::DbError.key());
    }

    warn!(id, kind = key, error = %failure.message, "record failed");
    if policy.skip {
        ctx.stats.record_skipped(key);
        RecordOutcome::Skipped(key)
    } else {
        ctx.stats.record_failed(key);
        RecordOutcome::Failed(key)
    }
}
