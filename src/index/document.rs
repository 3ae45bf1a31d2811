//! Index row types and status definitions.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Download workflow status of an index row.
///
/// Transitions form a DAG: `pending → in_progress → {completed | failed |
/// pending}`; `pending → skipped`; `failed → pending` on operator retry.
/// `completed` is terminal except for explicit re-queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Waiting to be processed.
    Pending,
    /// Claimed by a worker and being downloaded.
    InProgress,
    /// Archived successfully; `gcs_path` is set.
    Completed,
    /// Failed after all retries exhausted (operator retries via stage).
    Failed,
    /// Permanently excluded (invalid row, duplicate, excluded portal).
    Skipped,
}

impl DownloadStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DownloadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("invalid download status: {s}")),
        }
    }
}

/// Which ingestion path produced an index row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    /// Modern DuProcess index spreadsheets.
    DuProcess,
    /// Typewritten historical-deeds checklist.
    Historical,
}

impl RecordSource {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuProcess => "du_process",
            Self::Historical => "historical",
        }
    }
}

impl fmt::Display for RecordSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RecordSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "du_process" => Ok(Self::DuProcess),
            "historical" => Ok(Self::Historical),
            _ => Err(format!("invalid record source: {s}")),
        }
    }
}

/// A single row of the index store.
///
/// Most index fields are optional free text; the bulk loaders populate what
/// each spreadsheet happens to carry. Workflow fields at the bottom are owned
/// by the pipeline and never written by ingest.
#[derive(Debug, Clone, FromRow)]
pub struct IndexDocument {
    /// Unique identifier assigned by the store.
    pub id: i64,
    /// Which ingestion path produced the row (stored as text, parsed via `source()`).
    #[sqlx(rename = "source")]
    pub source_str: String,
    /// Provenance only; the spreadsheet the row came from.
    pub source_file: Option<String>,

    /// Recording book number (absent for malformed rows).
    pub book: Option<i64>,
    /// Recording page number.
    pub page: Option<i64>,
    /// Recorder-assigned instrument number; preferred lookup key when present.
    pub instrument_number: Option<i64>,
    /// General index number.
    pub gin: Option<i64>,
    /// Book volume designator (e.g. "DT" for deed-of-trust books).
    pub book_volume: Option<String>,

    /// Raw instrument type text from the index.
    pub instrument_type_raw: Option<String>,
    /// Raw type uppercased up to the first " - " separator.
    pub instrument_type_parsed: Option<String>,
    /// Taxonomy code (stored as text, parsed via `document_type()`).
    pub document_type: Option<String>,

    /// Recording date as written in the index.
    pub file_date: Option<String>,
    /// Page count reported by the index.
    pub num_pages: Option<i64>,
    pub party_type: Option<String>,
    pub party_seq: Option<i64>,
    pub searched_name: Option<String>,
    pub cross_party_name: Option<String>,
    pub grantor_party: Option<String>,
    pub grantee_party: Option<String>,

    pub description: Option<String>,
    pub location: Option<String>,
    pub direction: Option<String>,
    pub legals: Option<String>,
    pub sub_div: Option<String>,
    pub block: Option<String>,
    pub lot: Option<String>,
    pub sec: Option<String>,
    pub town: Option<String>,
    pub rng: Option<String>,
    pub square: Option<String>,
    pub remarks: Option<String>,

    // Quarter-section flags, quarter of quarter (ne_nw = NE 1/4 of NW 1/4).
    pub qs_ne_ne: bool,
    pub qs_ne_nw: bool,
    pub qs_ne_se: bool,
    pub qs_ne_sw: bool,
    pub qs_nw_ne: bool,
    pub qs_nw_nw: bool,
    pub qs_nw_se: bool,
    pub qs_nw_sw: bool,
    pub qs_se_ne: bool,
    pub qs_se_nw: bool,
    pub qs_se_se: bool,
    pub qs_se_sw: bool,
    pub qs_sw_ne: bool,
    pub qs_sw_nw: bool,
    pub qs_sw_se: bool,
    pub qs_sw_sw: bool,

    pub address: Option<String>,
    pub street_name: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub parcel_num: Option<String>,
    pub parcel_id: Option<String>,
    pub ppin: Option<String>,
    pub patent_num: Option<String>,

    /// Current workflow status (stored as text, parsed via `status()`).
    #[sqlx(rename = "download_status")]
    pub status_str: String,
    /// 1 (critical) … 4 (low); null until the cleaning pass assigns it.
    pub download_priority: Option<i64>,
    /// Monotonic non-decreasing attempt counter.
    pub download_attempts: i64,
    /// Last error, truncated to 500 chars.
    pub download_error: Option<String>,
    /// When the archive upload completed.
    pub downloaded_at: Option<String>,
    /// Last mutation time; drives stale-in-progress recovery.
    pub updated_at: String,
    /// When the row was ingested.
    pub import_date: String,
    /// Archive URI; non-null iff status is `completed`.
    pub gcs_path: Option<String>,
    /// Book number read back from the portal's response.
    pub actual_book: Option<i64>,
    /// Page number read back from the portal's response.
    pub actual_page: Option<i64>,
    /// True iff `(actual_book, actual_page)` differs from `(book, page)`.
    pub book_page_mismatch: bool,

    /// Original free-text cross-reference string.
    pub related_items_raw: Option<String>,
    /// Structured cross-references as JSON, written by the related-items parser.
    pub related_items: Option<String>,
}

impl IndexDocument {
    /// Returns the parsed status enum.
    ///
    /// Falls back to `Pending` if the status string is invalid.
    #[must_use]
    pub fn status(&self) -> DownloadStatus {
        self.status_str.parse().unwrap_or(DownloadStatus::Pending)
    }

    /// Returns the parsed record source.
    ///
    /// Falls back to `DuProcess` if the stored string is invalid; the CHECK
    /// constraint makes that unreachable for rows written through this crate.
    #[must_use]
    pub fn source(&self) -> RecordSource {
        self.source_str.parse().unwrap_or(RecordSource::DuProcess)
    }

    /// Returns the parsed document type, if the column is set.
    ///
    /// Unrecognized codes collapse to `DocumentType::Unknown`.
    #[must_use]
    pub fn document_type(&self) -> Option<super::DocumentType> {
        self.document_type
            .as_deref()
            .map(super::DocumentType::from_code)
    }

    /// Returns true when the row still has work ahead of it.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self.status(),
            DownloadStatus::Pending | DownloadStatus::InProgress
        )
    }
}

impl fmt::Display for IndexDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IndexDocument {{ id: {}, book: {:?}, page: {:?}, status: {} }}",
            self.id,
            self.book,
            self.page,
            self.status()
        )
    }
}

/// Field set for inserting a new index row.
///
/// Ingest proper is an external collaborator; this type exists for the upsert
/// seam it writes through and for test fixtures. `Default` leaves every index
/// field absent so fixtures only name what they assert on.
#[derive(Debug, Clone, Default)]
pub struct NewIndexDocument {
    pub source: Option<RecordSource>,
    pub source_file: Option<String>,
    pub book: Option<i64>,
    pub page: Option<i64>,
    pub instrument_number: Option<i64>,
    pub gin: Option<i64>,
    pub book_volume: Option<String>,
    pub instrument_type_raw: Option<String>,
    pub instrument_type_parsed: Option<String>,
    pub document_type: Option<String>,
    pub file_date: Option<String>,
    pub num_pages: Option<i64>,
    pub grantor_party: Option<String>,
    pub grantee_party: Option<String>,
    pub description: Option<String>,
    pub related_items_raw: Option<String>,
    pub download_priority: Option<i64>,
}

impl NewIndexDocument {
    /// Returns the source string for binding, defaulting to `du_process`.
    #[must_use]
    pub fn source_str(&self) -> &'static str {
        self.source.unwrap_or(RecordSource::DuProcess).as_str()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn blank_document() -> IndexDocument {
        IndexDocument {
            id: 1,
            source_str: "du_process".to_string(),
            source_file: None,
            book: Some(100),
            page: Some(5),
            instrument_number: None,
            gin: None,
            book_volume: None,
            instrument_type_raw: None,
            instrument_type_parsed: None,
            document_type: None,
            file_date: None,
            num_pages: None,
            party_type: None,
            party_seq: None,
            searched_name: None,
            cross_party_name: None,
            grantor_party: None,
            grantee_party: None,
            description: None,
            location: None,
            direction: None,
            legals: None,
            sub_div: None,
            block: None,
            lot: None,
            sec: None,
            town: None,
            rng: None,
            square: None,
            remarks: None,
            qs_ne_ne: false,
            qs_ne_nw: false,
            qs_ne_se: false,
            qs_ne_sw: false,
            qs_nw_ne: false,
            qs_nw_nw: false,
            qs_nw_se: false,
            qs_nw_sw: false,
            qs_se_ne: false,
            qs_se_nw: false,
            qs_se_se: false,
            qs_se_sw: false,
            qs_sw_ne: false,
            qs_sw_nw: false,
            qs_sw_se: false,
            qs_sw_sw: false,
            address: None,
            street_name: None,
            city: None,
            zip: None,
            parcel_num: None,
            parcel_id: None,
            ppin: None,
            patent_num: None,
            status_str: "pending".to_string(),
            download_priority: None,
            download_attempts: 0,
            download_error: None,
            downloaded_at: None,
            updated_at: "2026-01-01 00:00:00".to_string(),
            import_date: "2026-01-01 00:00:00".to_string(),
            gcs_path: None,
            actual_book: None,
            actual_page: None,
            book_page_mismatch: false,
            related_items_raw: None,
            related_items: None,
        }
    }

    // ==================== DownloadStatus Tests ====================

    #[test]
    fn test_download_status_as_str() {
        assert_eq!(DownloadStatus::Pending.as_str(), "pending");
        assert_eq!(DownloadStatus::InProgress.as_str(), "in_progress");
        assert_eq!(DownloadStatus::Completed.as_str(), "completed");
        assert_eq!(DownloadStatus::Failed.as_str(), "failed");
        assert_eq!(DownloadStatus::Skipped.as_str(), "skipped");
    }

    #[test]
    fn test_download_status_from_str_roundtrip() {
        for status in [
            DownloadStatus::Pending,
            DownloadStatus::InProgress,
            DownloadStatus::Completed,
            DownloadStatus::Failed,
            DownloadStatus::Skipped,
        ] {
            assert_eq!(status.as_str().parse::<DownloadStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_download_status_from_str_invalid() {
        let result = "paused".parse::<DownloadStatus>();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("invalid download status"));
    }

    #[test]
    fn test_download_status_serde_snake_case() {
        let json = serde_json::to_string(&DownloadStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let parsed: DownloadStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, DownloadStatus::InProgress);
    }

    // ==================== RecordSource Tests ====================

    #[test]
    fn test_record_source_as_str() {
        assert_eq!(RecordSource::DuProcess.as_str(), "du_process");
        assert_eq!(RecordSource::Historical.as_str(), "historical");
    }

    #[test]
    fn test_record_source_from_str() {
        assert_eq!(
            "du_process".parse::<RecordSource>().unwrap(),
            RecordSource::DuProcess
        );
        assert_eq!(
            "historical".parse::<RecordSource>().unwrap(),
            RecordSource::Historical
        );
        assert!("duprocess".parse::<RecordSource>().is_err());
    }

    // ==================== IndexDocument Tests ====================

    #[test]
    fn test_document_status_parses_correctly() {
        let mut doc = blank_document();
        doc.status_str = "in_progress".to_string();
        assert_eq!(doc.status(), DownloadStatus::InProgress);
    }

    #[test]
    fn test_document_status_fallback_on_invalid() {
        let mut doc = blank_document();
        doc.status_str = "garbage".to_string();
        assert_eq!(doc.status(), DownloadStatus::Pending);
    }

    #[test]
    fn test_document_type_none_when_column_null() {
        let doc = blank_document();
        assert!(doc.document_type().is_none());
    }

    #[test]
    fn test_document_type_unknown_for_unrecognized_code() {
        let mut doc = blank_document();
        doc.document_type = Some("NOT_A_REAL_TYPE".to_string());
        assert_eq!(doc.document_type(), Some(crate::index::DocumentType::Unknown));
    }

    #[test]
    fn test_is_active_for_pending_and_in_progress_only() {
        let mut doc = blank_document();
        for (status, active) in [
            ("pending", true),
            ("in_progress", true),
            ("completed", false),
            ("failed", false),
            ("skipped", false),
        ] {
            doc.status_str = status.to_string();
            assert_eq!(doc.is_active(), active, "status {status}");
        }
    }

    #[test]
    fn test_document_display() {
        let doc = blank_document();
        let display = doc.to_string();
        assert!(display.contains("100"));
        assert!(display.contains("pending"));
    }

    #[test]
    fn test_new_document_default_source_is_du_process() {
        let new_doc = NewIndexDocument::default();
        assert_eq!(new_doc.source_str(), "du_process");
    }
}
