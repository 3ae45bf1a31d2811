//! One-shot index cleaning pass.
//!
//! Runs before any download stage and is idempotent: every step only
//! touches `pending` rows, so a second run finds nothing left to change.
//!
//! Steps, in order:
//! 1. Skip rows with null or non-positive book/page.
//! 2. Skip rows the router maps to the New portal (Phase 1 exclusion).
//! 3. For each `(book, page, source)` group with multiple pending rows,
//!    keep the earliest by `(file_date, import_date)` and skip the rest.
//! 4. Assign download priorities to the surviving pending rows.

use serde::Serialize;
use tracing::{info, instrument};

use super::{Queue, QueueError, Result};
use crate::portal::{MID_PORTAL_FIRST_BOOK, NEW_PORTAL_FIRST_BOOK};

/// Skip reason for rows with unusable locators.
pub const REASON_INVALID_RECORD: &str = "Invalid or missing book/page";

/// Skip reason for rows routed to the excluded portal.
pub const REASON_EXCLUDED_PORTAL: &str = "NEW portal excluded from Phase 1";

/// Skip reason for duplicate rows losing the dedup.
pub const REASON_DUPLICATE: &str = "Duplicate book/page (older record)";

/// Counts from a cleaning run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CleaningReport {
    /// Rows skipped for null/non-positive book or page.
    pub invalid_records: u64,
    /// Rows skipped because their book routes to the New portal.
    pub excluded_portal: u64,
    /// Duplicate rows skipped in favor of an earlier sibling.
    pub duplicates: u64,
    /// Pending rows whose priority was (re)assigned.
    pub priorities_assigned: u64,
}

impl CleaningReport {
    /// Total rows newly skipped by the pass.
    #[must_use]
    pub fn total_skipped(&self) -> u64 {
        self.invalid_records + self.excluded_portal + self.duplicates
    }
}

/// Selects duplicate pending rows: everything after the first of each
/// `(book, page, source)` group, earliest by `(file_date, import_date)`.
/// Null file dates sort last so a dated record always wins.
const DUPLICATE_IDS_SQL: &str = r"
    SELECT id FROM (
        SELECT id,
               ROW_NUMBER() OVER (
                   PARTITION BY book, page, source
                   ORDER BY (file_date IS NULL), file_date ASC, import_date ASC, id ASC
               ) AS row_num
        FROM index_documents
        WHERE download_status = 'pending'
          AND book IS NOT NULL
          AND page IS NOT NULL
    )
    WHERE row_num > 1";

impl Queue {
    /// Runs the cleaning pass.
    ///
    /// With `dry_run` the pass only counts what it would change.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if any statement fails.
    #[instrument(skip(self))]
    pub async fn clean(&self, dry_run: bool) -> Result<CleaningReport> {
        let mut report = CleaningReport::default();

        report.invalid_records = self.clean_invalid(dry_run).await?;
        report.excluded_portal = self.clean_excluded_portal(dry_run).await?;
        report.duplicates = self.clean_duplicates(dry_run).await?;
        report.priorities_assigned = self.assign_priorities(dry_run).await?;

        info!(
            invalid = report.invalid_records,
            excluded = report.excluded_portal,
            duplicates = report.duplicates,
            priorities = report.priorities_assigned,
            dry_run,
            "cleaning pass finished"
        );

        Ok(report)
    }

    /// Step 1: rows with null or non-positive book/page can never be
    /// looked up and are skipped as invalid.
    async fn clean_invalid(&self, dry_run: bool) -> Result<u64> {
        const PREDICATE: &str = r"download_status = 'pending'
            AND (book IS NULL OR book <= 0 OR page IS NULL OR page <= 0)";

        if dry_run {
            return self.count_where(PREDICATE).await;
        }

        let sql = format!(
            r"UPDATE index_documents
              SET download_status = 'skipped',
                  download_error = '{REASON_INVALID_RECORD}',
                  updated_at = datetime('now')
              WHERE {PREDICATE}"
        );
        let result = sqlx::query(&sql).execute(self.database().pool()).await?;
        Ok(result.rows_affected())
    }

    /// Step 2: Phase 1 never touches the New portal.
    async fn clean_excluded_portal(&self, dry_run: bool) -> Result<u64> {
        let predicate = format!(
            "download_status = 'pending' AND book >= {NEW_PORTAL_FIRST_BOOK}"
        );

        if dry_run {
            return self.count_where(&predicate).await;
        }

        let sql = format!(
            r"UPDATE index_documents
              SET download_status = 'skipped',
                  download_error = '{REASON_EXCLUDED_PORTAL}',
                  updated_at = datetime('now')
              WHERE {predicate}"
        );
        let result = sqlx::query(&sql).execute(self.database().pool()).await?;
        Ok(result.rows_affected())
    }

    /// Step 3: duplicate `(book, page, source)` groups keep one row.
    async fn clean_duplicates(&self, dry_run: bool) -> Result<u64> {
        if dry_run {
            let sql = format!("SELECT COUNT(*) FROM ({DUPLICATE_IDS_SQL})");
            let (count,): (i64,) = sqlx::query_as(&sql)
                .fetch_one(self.database().pool())
                .await?;
            return Ok(u64::try_from(count).unwrap_or(0));
        }

        let sql = format!(
            r"UPDATE index_documents
              SET download_status = 'skipped',
                  download_error = '{REASON_DUPLICATE}',
                  updated_at = datetime('now')
              WHERE id IN ({DUPLICATE_IDS_SQL})"
        );
        let result = sqlx::query(&sql).execute(self.database().pool()).await?;
        Ok(result.rows_affected())
    }

    /// Step 4: priority assignment for the surviving pending rows.
    ///
    /// 1 = wills/testaments, 2 = historical books, 3 = Mid books,
    /// 4 = everything else. Recomputing on every run is deliberate: the
    /// formula is a pure function of the row, so reruns converge.
    async fn assign_priorities(&self, dry_run: bool) -> Result<u64> {
        let case = format!(
            r"CASE
                  WHEN upper(coalesce(document_type, '')) LIKE '%WILL%'
                    OR upper(coalesce(document_type, '')) LIKE '%TESTAMENT%'
                    OR upper(coalesce(instrument_type_parsed, '')) LIKE '%WILL%'
                    OR upper(coalesce(instrument_type_parsed, '')) LIKE '%TESTAMENT%'
                  THEN 1
                  WHEN book < {MID_PORTAL_FIRST_BOOK} THEN 2
                  WHEN book < {NEW_PORTAL_FIRST_BOOK} THEN 3
                  ELSE 4
              END"
        );

        if dry_run {
            let predicate = format!(
                r"download_status = 'pending'
                  AND (download_priority IS NULL OR download_priority != {case})"
            );
            return self.count_where(&predicate).await;
        }

        let sql = format!(
            r"UPDATE index_documents
              SET download_priority = {case},
                  updated_at = datetime('now')
              WHERE download_status = 'pending'
                AND (download_priority IS NULL OR download_priority != {case})"
        );
        let result = sqlx::query(&sql).execute(self.database().pool()).await?;
        Ok(result.rows_affected())
    }

    /// Counts rows matching a predicate; dry-run support.
    async fn count_where(&self, predicate: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM index_documents WHERE {predicate}");
        let (count,): (i64,) = sqlx::query_as(&sql)
            .fetch_one(self.database().pool())
            .await
            .map_err(QueueError::Database)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
