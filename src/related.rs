//! Related-items parser: offline cross-reference enrichment.
//!
//! Index rows carry free-text cross-references of the form
//! `"INSTRUMENT bk:BOOK/PAGE"`, one per line. This pass parses them into
//! structured references, validates each against the index by
//! `(book, page)`, and writes the result back as JSON. It is idempotent:
//! rerunning over unchanged raw text against a frozen index produces
//! byte-identical JSON.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::{debug, info, instrument};

use crate::queue::{Queue, Result};

/// Default rows per processing batch.
pub const DEFAULT_BATCH_SIZE: i64 = 1000;

/// One structured cross-reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedRef {
    /// Instrument number of the referenced record.
    pub instrument_number: i64,
    /// Referenced book.
    pub book: i64,
    /// Referenced page.
    pub page: i64,
    /// True when the index holds a row at `(book, page)`.
    pub exists_in_db: bool,
    /// Id of the matched index row; set iff `exists_in_db`.
    pub target_id: Option<i64>,
}

/// Counts from a parser run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RelatedReport {
    /// Rows with raw cross-reference text examined.
    pub rows_processed: u64,
    /// Rows whose text yielded at least one reference.
    pub rows_with_refs: u64,
    /// References parsed (after per-row dedup).
    pub refs_parsed: u64,
    /// References that matched an index row.
    pub refs_matched: u64,
    /// Rows updated in the store (zero on dry runs).
    pub rows_updated: u64,
}

/// Aggregate counts for `--stats-only`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RelatedStats {
    /// Total index rows.
    pub total_rows: u64,
    /// Rows carrying raw cross-reference text.
    pub rows_with_raw: u64,
    /// Rows with structured references already written.
    pub rows_parsed: u64,
}

#[allow(clippy::expect_used)]
fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Whitespace around the slash is tolerated; the index is hand-keyed.
    RE.get_or_init(|| Regex::new(r"(\d+)\s+bk:(\d+)\s*/\s*(\d+)").expect("static regex"))
}

/// Parses raw cross-reference text into `(instrument, book, page)` triples.
///
/// Lines are independent; the reference pattern is applied globally within
/// each line, and duplicates are dropped keeping first-seen order.
///
/// # Examples
///
/// ```
/// use deedpull_core::related::parse_related_raw;
///
/// let refs = parse_related_raw("12345 bk:500/12\n67890 bk:501 /  13\n12345 bk:500/12");
/// assert_eq!(refs, vec![(12345, 500, 12), (67890, 501, 13)]);
/// ```
#[must_use]
pub fn parse_related_raw(raw: &str) -> Vec<(i64, i64, i64)> {
    let mut refs = Vec::new();

    for line in raw.lines() {
        for captures in reference_regex().captures_iter(line) {
            let triple = (
                captures[1].parse::<i64>(),
                captures[2].parse::<i64>(),
                captures[3].parse::<i64>(),
            );
            if let (Ok(instrument), Ok(book), Ok(page)) = triple {
                let parsed = (instrument, book, page);
                if !refs.contains(&parsed) {
                    refs.push(parsed);
                }
            }
        }
    }

    refs
}

/// Offline batch parser over the index store.
#[derive(Debug, Clone)]
pub struct RelatedItemsParser {
    queue: Queue,
    batch_size: i64,
}

impl RelatedItemsParser {
    /// Creates a parser over the given queue.
    #[must_use]
    pub fn new(queue: Queue, batch_size: i64) -> Self {
        Self {
            queue,
            batch_size: batch_size.max(1),
        }
    }

    /// Runs the enrichment pass.
    ///
    /// With `dry_run`, parsing and cross-referencing happen but nothing is
    /// written back.
    ///
    /// # Errors
    ///
    /// Returns [`crate::queue::QueueError`] if any store operation fails.
    #[instrument(skip(self))]
    pub async fn run(&self, dry_run: bool) -> Result<RelatedReport> {
        let mut report = RelatedReport::default();
        let mut after_id = 0_i64;

        loop {
            let batch = self
                .queue
                .fetch_related_raw_batch(after_id, self.batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }
            after_id = batch.last().map_or(after_id, |(id, _)| *id);

            self.process_batch(&batch, dry_run, &mut report).await?;
            debug!(
                rows = report.rows_processed,
                refs = report.refs_parsed,
                "related-items batch done"
            );
        }

        info!(
            rows = report.rows_processed,
            rows_with_refs = report.rows_with_refs,
            refs = report.refs_parsed,
            matched = report.refs_matched,
            updated = report.rows_updated,
            dry_run,
            "related-items pass finished"
        );
        Ok(report)
    }

    /// Parses and cross-references one batch, writing back unless dry-run.
    async fn process_batch(
        &self,
        batch: &[(i64, String)],
        dry_run: bool,
        report: &mut RelatedReport,
    ) -> Result<()> {
        // Parse every row first so one bulk lookup serves the whole batch.
        let parsed: Vec<(i64, Vec<(i64, i64, i64)>)> = batch
            .iter()
            .map(|(id, raw)| (*id, parse_related_raw(raw)))
            .collect();

        let mut books: Vec<i64> = parsed
            .iter()
            .flat_map(|(_, refs)| refs.iter().map(|(_, book, _)| *book))
            .collect();
        books.sort_unstable();
        books.dedup();

        // First-seen (lowest id) wins when multiple rows share (book, page).
        let mut targets: HashMap<(i64, i64), i64> = HashMap::new();
        for (id, book, page) in self.queue.lookup_by_books(&books).await? {
            targets.entry((book, page)).or_insert(id);
        }

        for (id, refs) in parsed {
            report.rows_processed += 1;
            if refs.is_empty() {
                continue;
            }
            report.rows_with_refs += 1;

            let enriched: Vec<RelatedRef> = refs
                .into_iter()
                .map(|(instrument_number, book, page)| {
                    let target_id = targets.get(&(book, page)).copied();
                    if target_id.is_some() {
                        report.refs_matched += 1;
                    }
                    report.refs_parsed += 1;
                    RelatedRef {
                        instrument_number,
                        book,
                        page,
                        exists_in_db: target_id.is_some(),
                        target_id,
                    }
                })
                .collect();

            if !dry_run {
                match serde_json::to_string(&enriched) {
                    Ok(json) => {
                        self.queue.update_related_items(id, &json).await?;
                        report.rows_updated += 1;
                    }
                    Err(e) => {
                        tracing::warn!(id, error = %e, "failed to serialize references");
                    }
                }
            }
        }

        Ok(())
    }

    /// Returns aggregate counts without touching anything.
    ///
    /// # Errors
    ///
    /// Returns [`crate::queue::QueueError`] if the counts fail.
    #[instrument(skip(self))]
    pub async fn stats(&self) -> Result<RelatedStats> {
        let pool = self.queue.database().pool();

        let (total_rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM index_documents")
            .fetch_one(pool)
            .await?;
        let (rows_with_raw,): (i64,) = sqlx::query_as(
            r"SELECT COUNT(*) FROM index_documents
              WHERE related_items_raw IS NOT NULL AND related_items_raw != ''",
        )
        .fetch_one(pool)
        .await?;
        let (rows_parsed,): (i64,) = sqlx::query_as(
            r"SELECT COUNT(*) FROM index_documents WHERE related_items IS NOT NULL",
        )
        .fetch_one(pool)
        .await?;

        Ok(RelatedStats {
            total_rows: u64::try_from(total_rows).unwrap_or(0),
            rows_with_raw: u64::try_from(rows_with_raw).unwrap_or(0),
            rows_parsed: u64::try_from(rows_parsed).unwrap_or(0),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Grammar Tests ====================

    #[test]
    fn test_parse_single_reference() {
        assert_eq!(parse_related_raw("12345 bk:500/12"), vec![(12345, 500, 12)]);
    }

    #[test]
    fn test_parse_tolerates_whitespace_around_slash() {
        assert_eq!(
            parse_related_raw("67890 bk:501 /  13"),
            vec![(67890, 501, 13)]
        );
    }

    #[test]
    fn test_parse_multiple_lines_and_dedup() {
        let refs = parse_related_raw("12345 bk:500/12\n67890 bk:501 /  13\n12345 bk:500/12");
        assert_eq!(refs, vec![(12345, 500, 12), (67890, 501, 13)]);
    }

    #[test]
    fn test_parse_multiple_refs_on_one_line() {
        let refs = parse_related_raw("111 bk:9/1  222 bk:10/2");
        assert_eq!(refs, vec![(111, 9, 1), (222, 10, 2)]);
    }

    #[test]
    fn test_parse_ignores_noise() {
        assert!(parse_related_raw("see also deed book five").is_empty());
        assert!(parse_related_raw("").is_empty());
        // Missing instrument number does not match the grammar.
        assert!(parse_related_raw("bk:500/12").is_empty());
    }

    #[test]
    fn test_parse_is_deterministic() {
        let raw = "5 bk:1/2\n7 bk:3/4\n5 bk:1/2\n9 bk:1/2";
        assert_eq!(parse_related_raw(raw), parse_related_raw(raw));
    }

    // ==================== Serialization ====================

    #[test]
    fn test_related_ref_json_shape() {
        let reference = RelatedRef {
            instrument_number: 12345,
            book: 500,
            page: 12,
            exists_in_db: true,
            target_id: Some(7),
        };
        let json = serde_json::to_string(&reference).unwrap();
        assert_eq!(
            json,
            r#"{"instrument_number":12345,"book":500,"page":12,"exists_in_db":true,"target_id":7}"#
        );
    }

    #[test]
    fn test_related_ref_exists_iff_target() {
        let unmatched = RelatedRef {
            instrument_number: 1,
            book: 2,
            page: 3,
            exists_in_db: false,
            target_id: None,
        };
        let json = serde_json::to_string(&unmatched).unwrap();
        let parsed: RelatedRef = serde_json::from_str(&json).unwrap();
        assert!(!parsed.exists_in_db);
        assert!(parsed.target_id.is_none());
    }
}
