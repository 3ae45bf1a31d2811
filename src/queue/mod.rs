//! Queue management over the index store.
//!
//! The index store is the only persistent state in the system; the queue is
//! a set of stateless views and transitions over it. Rows move through the
//! status machine `pending → in_progress → {completed | failed | pending}`,
//! with `skipped` as the terminal parking state for rows the pipeline must
//! never touch.
//!
//! # Overview
//!
//! - [`Queue`] - fetch/claim/settle operations
//! - [`Stage`] - named predicates and caps over the pending set
//! - [`CleaningReport`] and [`Queue::clean`] - the one-shot cleaning pass
//! - [`QueueError`] - operation error types
//!
//! # Claiming
//!
//! `fetch_next_batch` is a pure read; returned rows are *candidates*.
//! Workers must win the compare-and-set in [`Queue::mark_in_progress`]
//! before touching a record, which is what makes duplicate processing
//! impossible across concurrent workers.

mod clean;
mod error;
mod stage;

pub use clean::{
    CleaningReport, REASON_DUPLICATE, REASON_EXCLUDED_PORTAL, REASON_INVALID_RECORD,
};
pub use error::QueueError;
pub use stage::{Stage, SAMPLE_BOOKS};

use sqlx::Row;
use tracing::{debug, instrument};

use crate::db::Database;
use crate::index::{DownloadStatus, IndexDocument, NewIndexDocument};

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Maximum download attempts before a record parks in `failed`.
pub const MAX_ATTEMPTS: i64 = 5;

/// Maximum stored length of a download error message.
pub const MAX_ERROR_LEN: usize = 500;

/// Default age after which an `in_progress` row is considered abandoned.
pub const DEFAULT_STALE_MINUTES: i64 = 30;

/// Returns `Ok(())` if at least one row was affected; otherwise [`QueueError::DocumentNotFound`].
fn check_affected(id: i64, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(QueueError::DocumentNotFound(id))
    } else {
        Ok(())
    }
}

/// Truncates an error message to the stored limit on a char boundary.
#[must_use]
pub fn truncate_error(error: &str) -> String {
    if error.len() <= MAX_ERROR_LEN {
        return error.to_string();
    }
    let mut end = MAX_ERROR_LEN;
    while !error.is_char_boundary(end) {
        end -= 1;
    }
    error[..end].to_string()
}

/// Queue manager over the index store.
///
/// Stateless; every method is a single short transaction so the connection
/// returns to the pool immediately.
#[derive(Debug, Clone)]
pub struct Queue {
    db: Database,
}

impl Queue {
    /// Creates a new queue manager with the given database connection.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the underlying database handle.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Inserts a new index row with pending status.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the insert fails.
    #[instrument(skip(self, doc), fields(book = ?doc.book, page = ?doc.page))]
    pub async fn insert(&self, doc: &NewIndexDocument) -> Result<i64> {
        let result = sqlx::query(
            r"INSERT INTO index_documents (
                source,
                source_file,
                book,
                page,
                instrument_number,
                gin,
                book_volume,
                instrument_type_raw,
                instrument_type_parsed,
                document_type,
                file_date,
                num_pages,
                grantor_party,
                grantee_party,
                description,
                related_items_raw,
                download_priority
              )
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
              RETURNING id",
        )
        .bind(doc.source_str())
        .bind(doc.source_file.as_deref())
        .bind(doc.book)
        .bind(doc.page)
        .bind(doc.instrument_number)
        .bind(doc.gin)
        .bind(doc.book_volume.as_deref())
        .bind(doc.instrument_type_raw.as_deref())
        .bind(doc.instrument_type_parsed.as_deref())
        .bind(doc.document_type.as_deref())
        .bind(doc.file_date.as_deref())
        .bind(doc.num_pages)
        .bind(doc.grantor_party.as_deref())
        .bind(doc.grantee_party.as_deref())
        .bind(doc.description.as_deref())
        .bind(doc.related_items_raw.as_deref())
        .bind(doc.download_priority)
        .fetch_one(self.db.pool())
        .await?;

        Ok(result.get("id"))
    }

    /// Inserts a row or updates the existing one with the same
    /// `(book, page, source)` key.
    ///
    /// Re-ingest of the same record refreshes its index fields instead of
    /// duplicating the row; workflow fields are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if either statement fails.
    #[instrument(skip(self, doc), fields(book = ?doc.book, page = ?doc.page))]
    pub async fn upsert(&self, doc: &NewIndexDocument) -> Result<i64> {
        let existing: Option<(i64,)> = sqlx::query_as(
            r"SELECT id FROM index_documents
              WHERE book IS ? AND page IS ? AND source = ?
              ORDER BY id ASC
              LIMIT 1",
        )
        .bind(doc.book)
        .bind(doc.page)
        .bind(doc.source_str())
        .fetch_optional(self.db.pool())
        .await?;

        let Some((id,)) = existing else {
            return self.insert(doc).await;
        };

        sqlx::query(
            r"UPDATE index_documents
              SET source_file = ?,
                  instrument_number = ?,
                  gin = ?,
                  book_volume = ?,
                  instrument_type_raw = ?,
                  instrument_type_parsed = ?,
                  document_type = ?,
                  file_date = ?,
                  num_pages = ?,
                  grantor_party = ?,
                  grantee_party = ?,
                  description = ?,
                  related_items_raw = ?,
                  updated_at = datetime('now')
              WHERE id = ?",
        )
        .bind(doc.source_file.as_deref())
        .bind(doc.instrument_number)
        .bind(doc.gin)
        .bind(doc.book_volume.as_deref())
        .bind(doc.instrument_type_raw.as_deref())
        .bind(doc.instrument_type_parsed.as_deref())
        .bind(doc.document_type.as_deref())
        .bind(doc.file_date.as_deref())
        .bind(doc.num_pages)
        .bind(doc.grantor_party.as_deref())
        .bind(doc.grantee_party.as_deref())
        .bind(doc.description.as_deref())
        .bind(doc.related_items_raw.as_deref())
        .bind(id)
        .execute(self.db.pool())
        .await?;

        Ok(id)
    }

    /// Gets an index row by id.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get(&self, id: i64) -> Result<Option<IndexDocument>> {
        let doc = sqlx::query_as::<_, IndexDocument>(r"SELECT * FROM index_documents WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(doc)
    }

    /// Fetches the next batch of pending candidates for a stage.
    ///
    /// Pure read - no state mutation. Another worker may claim any returned
    /// row first; callers must win [`Self::mark_in_progress`] before
    /// processing. Rows come back ordered by `(priority, book, page)`.
    ///
    /// `resume_after` skips rows at or below a previously fetched id; the
    /// store remains authoritative, so passing `None` is always correct.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self), fields(stage = %stage))]
    pub async fn fetch_next_batch(
        &self,
        stage: Stage,
        limit: i64,
        resume_after: Option<i64>,
    ) -> Result<Vec<IndexDocument>> {
        let predicate = stage.predicate_sql();
        let cursor = match resume_after {
            Some(id) => format!("AND id > {id}"),
            None => String::new(),
        };

        let sql = format!(
            r"SELECT * FROM index_documents
              WHERE download_status = 'pending'
                AND {predicate}
                {cursor}
              ORDER BY download_priority ASC, book ASC, page ASC
              LIMIT ?"
        );

        let docs = sqlx::query_as::<_, IndexDocument>(&sql)
            .bind(limit)
            .fetch_all(self.db.pool())
            .await?;

        debug!(count = docs.len(), "fetched pending batch");
        Ok(docs)
    }

    /// Counts pending rows matching a stage's predicate.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self), fields(stage = %stage))]
    pub async fn count_stage_pending(&self, stage: Stage) -> Result<u64> {
        let predicate = stage.predicate_sql();
        let sql = format!(
            r"SELECT COUNT(*) FROM index_documents
              WHERE download_status = 'pending' AND {predicate}"
        );
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(self.db.pool()).await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Claims a record for processing: CAS from `pending` to `in_progress`,
    /// incrementing the attempt counter.
    ///
    /// Returns `false` when another worker (or a status change) got there
    /// first; callers skip the record silently in that case.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn mark_in_progress(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r"UPDATE index_documents
              SET download_status = 'in_progress',
                  download_attempts = download_attempts + 1,
                  updated_at = datetime('now')
              WHERE id = ? AND download_status = 'pending'",
        )
        .bind(id)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Settles a record as completed: stores the archive URI and the
    /// portal-reported locator, clears the error, stamps `downloaded_at`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::DocumentNotFound`] if no row exists with the
    /// given id, or [`QueueError::Database`] if the update fails.
    #[instrument(skip(self, gcs_path))]
    pub async fn mark_completed(
        &self,
        id: i64,
        gcs_path: &str,
        actual_book: Option<i64>,
        actual_page: Option<i64>,
        mismatch: bool,
    ) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE index_documents
              SET download_status = 'completed',
                  gcs_path = ?,
                  actual_book = ?,
                  actual_page = ?,
                  book_page_mismatch = ?,
                  download_error = NULL,
                  downloaded_at = datetime('now'),
                  updated_at = datetime('now')
              WHERE id = ?",
        )
        .bind(gcs_path)
        .bind(actual_book)
        .bind(actual_page)
        .bind(mismatch)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Settles a record as failed.
    ///
    /// With `retry` and attempts below [`MAX_ATTEMPTS`] the record returns
    /// to `pending` for a later batch; otherwise it parks in `failed` until
    /// operator intervention. The error is truncated to 500 chars.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::DocumentNotFound`] if no row exists with the
    /// given id, or [`QueueError::Database`] if the update fails.
    #[instrument(skip(self, error), fields(retry))]
    pub async fn mark_failed(&self, id: i64, error: &str, retry: bool) -> Result<()> {
        let error = truncate_error(error);
        let result = sqlx::query(
            r"UPDATE index_documents
              SET download_status = CASE
                      WHEN ? AND download_attempts < ? THEN 'pending'
                      ELSE 'failed'
                  END,
                  download_error = ?,
                  updated_at = datetime('now')
              WHERE id = ?",
        )
        .bind(retry)
        .bind(MAX_ATTEMPTS)
        .bind(&error)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Settles a record as skipped with a reason.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::DocumentNotFound`] if no row exists with the
    /// given id, or [`QueueError::Database`] if the update fails.
    #[instrument(skip(self, reason))]
    pub async fn mark_skipped(&self, id: i64, reason: &str) -> Result<()> {
        let reason = truncate_error(reason);
        let result = sqlx::query(
            r"UPDATE index_documents
              SET download_status = 'skipped',
                  download_error = ?,
                  updated_at = datetime('now')
              WHERE id = ?",
        )
        .bind(&reason)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Returns abandoned `in_progress` rows to `pending`.
    ///
    /// A row is abandoned when its `updated_at` is older than the
    /// threshold - a worker that crashed mid-flight never settled it. Run
    /// at scheduler startup and periodically thereafter; crash recovery
    /// relies on this plus the CAS claim.
    ///
    /// # Returns
    ///
    /// The number of rows reset.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn reset_stale(&self, threshold_minutes: i64) -> Result<u64> {
        let modifier = format!("-{} minutes", threshold_minutes.max(0));
        let result = sqlx::query(
            r"UPDATE index_documents
              SET download_status = 'pending',
                  updated_at = datetime('now')
              WHERE download_status = 'in_progress'
                AND updated_at < datetime('now', ?)",
        )
        .bind(&modifier)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Operator retry: returns `failed` rows with attempts to spare to
    /// `pending`.
    ///
    /// # Returns
    ///
    /// The number of rows re-queued.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn requeue_failed(&self, max_attempts: i64) -> Result<u64> {
        let result = sqlx::query(
            r"UPDATE index_documents
              SET download_status = 'pending',
                  updated_at = datetime('now')
              WHERE download_status = 'failed'
                AND download_attempts < ?",
        )
        .bind(max_attempts)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Counts rows by status.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn count_by_status(&self, status: DownloadStatus) -> Result<i64> {
        let result =
            sqlx::query(r"SELECT COUNT(*) as count FROM index_documents WHERE download_status = ?")
                .bind(status.as_str())
                .fetch_one(self.db.pool())
                .await?;

        Ok(result.get("count"))
    }

    /// Returns `(status, count)` pairs for every status present.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn status_counts(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r"SELECT download_status, COUNT(*) FROM index_documents
              GROUP BY download_status
              ORDER BY download_status",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows)
    }

    /// Returns `(priority, count)` pairs over the pending set.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn priority_counts(&self) -> Result<Vec<(Option<i64>, i64)>> {
        let rows = sqlx::query_as::<_, (Option<i64>, i64)>(
            r"SELECT download_priority, COUNT(*) FROM index_documents
              WHERE download_status = 'pending'
              GROUP BY download_priority
              ORDER BY download_priority",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows)
    }

    /// Returns the most frequent error strings on failed/skipped rows.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn error_counts(&self, limit: i64) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r"SELECT download_error, COUNT(*) AS n FROM index_documents
              WHERE download_status IN ('failed', 'skipped')
                AND download_error IS NOT NULL
              GROUP BY download_error
              ORDER BY n DESC
              LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows)
    }

    /// Returns rows completed within the last `hours`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn recently_completed(&self, hours: i64, limit: i64) -> Result<Vec<IndexDocument>> {
        let modifier = format!("-{} hours", hours.max(0));
        let docs = sqlx::query_as::<_, IndexDocument>(
            r"SELECT * FROM index_documents
              WHERE download_status = 'completed'
                AND downloaded_at >= datetime('now', ?)
              ORDER BY downloaded_at DESC
              LIMIT ?",
        )
        .bind(&modifier)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        Ok(docs)
    }

    /// Returns failed rows with their errors, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn recent_failures(&self, limit: i64) -> Result<Vec<IndexDocument>> {
        let docs = sqlx::query_as::<_, IndexDocument>(
            r"SELECT * FROM index_documents
              WHERE download_status = 'failed'
              ORDER BY updated_at DESC
              LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        Ok(docs)
    }

    /// Fetches a batch of rows carrying raw cross-reference text.
    ///
    /// Ordered by id so callers can page with `after_id`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn fetch_related_raw_batch(
        &self,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<(i64, String)>> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            r"SELECT id, related_items_raw FROM index_documents
              WHERE related_items_raw IS NOT NULL
                AND related_items_raw != ''
                AND id > ?
              ORDER BY id ASC
              LIMIT ?",
        )
        .bind(after_id)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows)
    }

    /// Bulk lookup of `(id, book, page)` for a set of book numbers.
    ///
    /// Callers filter to exact `(book, page)` pairs; rows come back ordered
    /// by id so first-seen-wins is deterministic.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self, books))]
    pub async fn lookup_by_books(&self, books: &[i64]) -> Result<Vec<(i64, i64, i64)>> {
        if books.is_empty() {
            return Ok(Vec::new());
        }

        let list = books
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            r"SELECT id, book, page FROM index_documents
              WHERE book IN ({list}) AND page IS NOT NULL
              ORDER BY id ASC"
        );

        let rows = sqlx::query_as::<_, (i64, i64, i64)>(&sql)
            .fetch_all(self.db.pool())
            .await?;

        Ok(rows)
    }

    /// Writes the structured cross-reference JSON back to a row.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::DocumentNotFound`] if no row exists with the
    /// given id, or [`QueueError::Database`] if the update fails.
    #[instrument(skip(self, related_json))]
    pub async fn update_related_items(&self, id: i64, related_json: &str) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE index_documents
              SET related_items = ?,
                  updated_at = datetime('now')
              WHERE id = ?",
        )
        .bind(related_json)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // Integration coverage lives in tests/queue_integration.rs; these unit
    // tests cover the pure helpers.

    #[test]
    fn test_truncate_error_short_passthrough() {
        assert_eq!(truncate_error("network error"), "network error");
    }

    #[test]
    fn test_truncate_error_caps_at_limit() {
        let long = "x".repeat(800);
        let truncated = truncate_error(&long);
        assert_eq!(truncated.len(), MAX_ERROR_LEN);
    }

    #[test]
    fn test_truncate_error_respects_char_boundary() {
        // A multi-byte char straddling the limit must not split.
        let mut long = "x".repeat(MAX_ERROR_LEN - 1);
        long.push('\u{00e9}');
        long.push_str("suffix");
        let truncated = truncate_error(&long);
        assert!(truncated.len() <= MAX_ERROR_LEN);
        assert!(truncated.is_char_boundary(truncated.len()));
    }

    #[test]
    fn test_check_affected() {
        assert!(check_affected(1, 1).is_ok());
        assert!(matches!(
            check_affected(7, 0),
            Err(QueueError::DocumentNotFound(7))
        ));
    }
}
