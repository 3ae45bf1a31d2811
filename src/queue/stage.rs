//! Download stages: named predicates and caps over the pending queue.
//!
//! A stage controls which slice of the index a run processes and how many
//! records it may settle before shutting down. Stage predicates compose
//! into the batch-fetch query; caps are enforced by the scheduler.

use std::fmt;

use crate::portal::{MID_PORTAL_FIRST_BOOK, NEW_PORTAL_FIRST_BOOK};

/// Books used by the sampling stages, chosen to span both Phase 1 portals.
pub const SAMPLE_BOOKS: &[i64] = &[9, 100, 237, 238, 500, 1200, 2500, 3971];

/// A named slice of the pending queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Smoke-test run: any priority, sample books spanning portals.
    Test,
    /// Every historical-portal book.
    HistoricalAll,
    /// Priorities 1-2 restricted to the sample books.
    Small,
    /// Priorities 1-2 fully, plus the priority-3 sample.
    Medium,
    /// The full priority-3 Mid range.
    Large,
    /// Re-queue of failed rows with attempts to spare.
    RetryFailed,
}

impl Stage {
    /// All stages, for CLI help and validation.
    pub const ALL: &'static [Stage] = &[
        Stage::Test,
        Stage::HistoricalAll,
        Stage::Small,
        Stage::Medium,
        Stage::Large,
        Stage::RetryFailed,
    ];

    /// Returns the stage name used on the CLI and in checkpoints.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::HistoricalAll => "historical-all",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::RetryFailed => "retry-failed",
        }
    }

    /// Returns the overall item cap for the stage, if any.
    #[must_use]
    pub fn cap(&self) -> Option<u64> {
        match self {
            Self::Test => Some(20),
            Self::Small => Some(2_000),
            Self::Medium => Some(50_000),
            Self::HistoricalAll | Self::Large | Self::RetryFailed => None,
        }
    }

    /// Returns the SQL predicate selecting this stage's records.
    ///
    /// Applied on top of `download_status = 'pending'`; the retry stage
    /// re-queues failed rows before fetching, so its fetch predicate is
    /// unrestricted.
    #[must_use]
    pub fn predicate_sql(&self) -> String {
        let samples = sample_books_sql();
        match self {
            Self::Test => format!("book IN ({samples})"),
            Self::HistoricalAll => format!("book < {MID_PORTAL_FIRST_BOOK}"),
            Self::Small => {
                format!("download_priority IN (1, 2) AND book IN ({samples})")
            }
            Self::Medium => format!(
                "(download_priority IN (1, 2) OR (download_priority = 3 AND book IN ({samples})))"
            ),
            Self::Large => format!(
                "download_priority = 3 AND book >= {MID_PORTAL_FIRST_BOOK} AND book < {NEW_PORTAL_FIRST_BOOK}"
            ),
            Self::RetryFailed => "1 = 1".to_string(),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test" => Ok(Self::Test),
            "historical-all" => Ok(Self::HistoricalAll),
            "small" => Ok(Self::Small),
            "medium" => Ok(Self::Medium),
            "large" => Ok(Self::Large),
            "retry-failed" => Ok(Self::RetryFailed),
            _ => Err(format!(
                "unknown stage: {s} (expected one of: test, historical-all, small, medium, large, retry-failed)"
            )),
        }
    }
}

/// Renders the sample-book list as a SQL `IN` body.
fn sample_books_sql() -> String {
    SAMPLE_BOOKS
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_name_roundtrip() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), *stage);
        }
    }

    #[test]
    fn test_stage_from_str_invalid() {
        let result = "stage-1-small".parse::<Stage>();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("unknown stage"));
    }

    #[test]
    fn test_stage_caps() {
        assert_eq!(Stage::Test.cap(), Some(20));
        assert_eq!(Stage::Small.cap(), Some(2_000));
        assert_eq!(Stage::Medium.cap(), Some(50_000));
        assert_eq!(Stage::HistoricalAll.cap(), None);
        assert_eq!(Stage::Large.cap(), None);
        assert_eq!(Stage::RetryFailed.cap(), None);
    }

    #[test]
    fn test_sample_books_span_both_portals() {
        assert!(SAMPLE_BOOKS.iter().any(|b| *b < MID_PORTAL_FIRST_BOOK));
        assert!(SAMPLE_BOOKS
            .iter()
            .any(|b| *b >= MID_PORTAL_FIRST_BOOK && *b < NEW_PORTAL_FIRST_BOOK));
        assert!(SAMPLE_BOOKS.iter().all(|b| *b < NEW_PORTAL_FIRST_BOOK));
    }

    #[test]
    fn test_historical_predicate_uses_book_range() {
        assert_eq!(Stage::HistoricalAll.predicate_sql(), "book < 238");
    }

    #[test]
    fn test_large_predicate_bounds_mid_range() {
        let sql = Stage::Large.predicate_sql();
        assert!(sql.contains("book >= 238"));
        assert!(sql.contains("book < 3972"));
        assert!(sql.contains("download_priority = 3"));
    }

    #[test]
    fn test_retry_predicate_is_unrestricted() {
        assert_eq!(Stage::RetryFailed.predicate_sql(), "1 = 1");
    }
}
