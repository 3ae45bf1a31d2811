//! Typed error kinds and the retry policy table.
//!
//! Every failure the per-record pipeline can hit maps to one
//! [`ErrorKind`]; each kind carries a fixed [`ErrorPolicy`] consulted by
//! the worker when settling a record. The table replaces ad-hoc `if`
//! ladders: classification happens once, at the error's origin, and the
//! policy decides between re-queueing, parking as failed, or skipping.

use crate::archive::ArchiveError;
use crate::portal::FetchError;
use crate::queue::QueueError;

/// Closed set of failure kinds, each with a stable stats key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A per-step deadline elapsed.
    Timeout,
    /// Transport-level failure.
    Network,
    /// Portal returned empty results or 404.
    NotFound,
    /// Expected PDF, got something else; or required HTML fields missing.
    InvalidResponse,
    /// Metadata parsed but no download link.
    NoImageAvailable,
    /// Structure present but locators failed.
    ParseError,
    /// Optimizer errored; soft when fallback to original bytes succeeds.
    OptimizerFailure,
    /// Archive upload errored after its own retries.
    UploadFailure,
    /// Index-store mutation failed.
    DbError,
    /// Record routes to a portal excluded from this phase.
    ExcludedPortal,
    /// Record is missing a usable locator.
    InvalidRecord,
}

/// Fixed handling for an error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorPolicy {
    /// Re-queue via `mark_failed(retry = true)` while attempts remain.
    pub retry: bool,
    /// Terminal: settle with `mark_skipped` instead of `mark_failed`.
    pub skip: bool,
}

impl ErrorKind {
    /// Returns the stable key used in stats histograms and reports.
    #[must_use]
    pub fn key(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::NotFound => "not_found",
            Self::InvalidResponse => "invalid_response",
            Self::NoImageAvailable => "no_image_available",
            Self::ParseError => "parse_error",
            Self::OptimizerFailure => "optimizer_failure",
            Self::UploadFailure => "upload_failure",
            Self::DbError => "db_error",
            Self::ExcludedPortal => "excluded_portal",
            Self::InvalidRecord => "invalid_record",
        }
    }

    /// Returns the fixed policy for this kind.
    #[must_use]
    pub fn policy(&self) -> ErrorPolicy {
        match self {
            // Transient: the portal or the network may recover.
            Self::Timeout
            | Self::Network
            | Self::InvalidResponse
            | Self::ParseError
            | Self::OptimizerFailure
            | Self::UploadFailure
            | Self::DbError => ErrorPolicy {
                retry: true,
                skip: false,
            },
            // Permanent for this record: retrying cannot produce a document.
            Self::NotFound | Self::NoImageAvailable => ErrorPolicy {
                retry: false,
                skip: false,
            },
            // Terminal exclusions: the record must never be fetched.
            Self::ExcludedPortal | Self::InvalidRecord => ErrorPolicy {
                retry: false,
                skip: true,
            },
        }
    }
}

/// A classified pipeline failure.
#[derive(Debug)]
pub struct WorkerFailure {
    /// The typed kind; drives policy and stats.
    pub kind: ErrorKind,
    /// Human-readable message stored in `download_error`.
    pub message: String,
}

impl WorkerFailure {
    /// Creates a failure with an explicit kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind.key(), self.message)
    }
}

impl From<FetchError> for WorkerFailure {
    fn from(error: FetchError) -> Self {
        let kind = match &error {
            FetchError::Timeout { .. } => ErrorKind::Timeout,
            FetchError::Network { .. } => ErrorKind::Network,
            FetchError::NotFound { .. } => ErrorKind::NotFound,
            FetchError::InvalidResponse { .. } => ErrorKind::InvalidResponse,
            FetchError::NoImageAvailable { .. } => ErrorKind::NoImageAvailable,
            FetchError::ParseError { .. } => ErrorKind::ParseError,
        };
        Self::new(kind, error.to_string())
    }
}

impl From<ArchiveError> for WorkerFailure {
    fn from(error: ArchiveError) -> Self {
        Self::new(ErrorKind::UploadFailure, error.to_string())
    }
}

impl From<QueueError> for WorkerFailure {
    fn from(error: QueueError) -> Self {
        Self::new(ErrorKind::DbError, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::DocumentMetadata;

    #[test]
    fn test_transient_kinds_retry() {
        for kind in [
            ErrorKind::Timeout,
            ErrorKind::Network,
            ErrorKind::InvalidResponse,
            ErrorKind::ParseError,
            ErrorKind::UploadFailure,
            ErrorKind::DbError,
        ] {
            let policy = kind.policy();
            assert!(policy.retry, "{kind:?} should retry");
            assert!(!policy.skip, "{kind:?} should not skip");
        }
    }

    #[test]
    fn test_permanent_kinds_park_as_failed() {
        for kind in [ErrorKind::NotFound, ErrorKind::NoImageAvailable] {
            let policy = kind.policy();
            assert!(!policy.retry, "{kind:?} should not retry");
            assert!(!policy.skip, "{kind:?} should not skip");
        }
    }

    #[test]
    fn test_exclusion_kinds_skip() {
        for kind in [ErrorKind::ExcludedPortal, ErrorKind::InvalidRecord] {
            let policy = kind.policy();
            assert!(policy.skip, "{kind:?} should skip");
        }
    }

    #[test]
    fn test_keys_match_error_taxonomy() {
        assert_eq!(ErrorKind::Timeout.key(), "timeout");
        assert_eq!(ErrorKind::NoImageAvailable.key(), "no_image_available");
        assert_eq!(ErrorKind::ExcludedPortal.key(), "excluded_portal");
        assert_eq!(ErrorKind::DbError.key(), "db_error");
    }

    #[test]
    fn test_fetch_error_classification() {
        let failure: WorkerFailure = FetchError::timeout("https://example.com").into();
        assert_eq!(failure.kind, ErrorKind::Timeout);

        let failure: WorkerFailure = FetchError::not_found("nothing").into();
        assert_eq!(failure.kind, ErrorKind::NotFound);

        let failure: WorkerFailure =
            FetchError::no_image("no anchor", DocumentMetadata::default()).into();
        assert_eq!(failure.kind, ErrorKind::NoImageAvailable);
    }

    #[test]
    fn test_failure_display_includes_kind_key() {
        let failure = WorkerFailure::new(ErrorKind::Network, "connection reset");
        let rendered = failure.to_string();
        assert!(rendered.contains("network"));
        assert!(rendered.contains("connection reset"));
    }
}
