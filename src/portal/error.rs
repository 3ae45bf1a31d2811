//! Error types for portal fetch operations.
//!
//! Every failure a portal client can produce is enumerated here so the
//! worker's retry policy table and the stats histogram can key off a closed
//! set instead of matching on message strings.

use super::DocumentMetadata;
use thiserror::Error;

/// Errors that can occur while fetching a document from a portal.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Transport-level failure (DNS, connection reset, TLS).
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The portal returned empty results or a 404.
    #[error("not found: {detail}")]
    NotFound {
        /// Short human-readable description.
        detail: String,
    },

    /// Expected a PDF (or parseable HTML) and got something else.
    #[error("invalid response: {detail}")]
    InvalidResponse {
        /// Short human-readable description.
        detail: String,
    },

    /// The result page parsed but carried no download link.
    ///
    /// Whatever metadata was extracted rides along so callers can still
    /// record the server's view of the document.
    #[error("no image available: {detail}")]
    NoImageAvailable {
        /// Short human-readable description.
        detail: String,
        /// Metadata parsed from the result page before the link search failed.
        metadata: Box<DocumentMetadata>,
    },

    /// Result structure was present but the locators failed to match.
    #[error("parse error: {detail}")]
    ParseError {
        /// Short human-readable description.
        detail: String,
    },
}

impl FetchError {
    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a not-found error.
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::NotFound {
            detail: detail.into(),
        }
    }

    /// Creates an invalid-response error.
    pub fn invalid_response(detail: impl Into<String>) -> Self {
        Self::InvalidResponse {
            detail: detail.into(),
        }
    }

    /// Creates a no-image-available error carrying parsed metadata.
    pub fn no_image(detail: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Self::NoImageAvailable {
            detail: detail.into(),
            metadata: Box::new(metadata),
        }
    }

    /// Creates a parse error.
    pub fn parse(detail: impl Into<String>) -> Self {
        Self::ParseError {
            detail: detail.into(),
        }
    }

    /// Classifies a reqwest error against the URL it was sent to.
    ///
    /// Timeouts get their own variant so the retry policy can treat them as
    /// transient without string matching.
    #[must_use]
    pub fn from_reqwest(url: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::timeout(url)
        } else {
            Self::network(url, error)
        }
    }

    /// Returns the stable stats-bucket key for this error.
    #[must_use]
    pub fn kind_key(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Network { .. } => "network",
            Self::NotFound { .. } => "not_found",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::NoImageAvailable { .. } => "no_image_available",
            Self::ParseError { .. } => "parse_error",
        }
    }
}
