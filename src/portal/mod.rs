//! Portal routing and client contracts.
//!
//! The county serves the same records through three upstream HTTP portals
//! split by book-number range. This module provides:
//!
//! - [`Portal`] - the three-valued routing tag
//! - [`route_book`] - the pure book-range router
//! - [`PortalClient`] - the async contract every portal client implements
//! - [`PortalRegistry`] - the per-portal client set the scheduler hands to
//!   workers
//! - [`CourthouseClient`] - the Historical/Mid implementation (same host,
//!   two query styles)
//!
//! # Example
//!
//! ```
//! use deedpull_core::portal::{route_book, Portal};
//!
//! assert_eq!(route_book(237), Some(Portal::Historical));
//! assert_eq!(route_book(238), Some(Portal::Mid));
//! assert_eq!(route_book(3972), Some(Portal::New));
//! assert_eq!(route_book(0), None);
//! ```

mod courthouse;
mod error;
pub mod html;
mod stitch;

pub use courthouse::CourthouseClient;
pub use error::FetchError;
pub use stitch::merge_pdfs;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// First book number served by the Mid portal.
pub const MID_PORTAL_FIRST_BOOK: i64 = 238;

/// First book number served by the New portal.
pub const NEW_PORTAL_FIRST_BOOK: i64 = 3972;

/// The three upstream portals, split by book-number range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Portal {
    /// Books below 238; typewritten historical volumes.
    Historical,
    /// Books 238 through 3971.
    Mid,
    /// Books 3972 and up; excluded from Phase 1.
    New,
}

impl Portal {
    /// Returns the lowercase portal name used in stats and paths.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Historical => "historical",
            Self::Mid => "mid",
            Self::New => "new",
        }
    }
}

impl fmt::Display for Portal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Routes a book number to its portal.
///
/// Returns `None` for non-positive books; callers are expected to have
/// already marked such rows skipped during the cleaning pass.
#[must_use]
pub fn route_book(book: i64) -> Option<Portal> {
    if book <= 0 {
        return None;
    }
    Some(if book < MID_PORTAL_FIRST_BOOK {
        Portal::Historical
    } else if book < NEW_PORTAL_FIRST_BOOK {
        Portal::Mid
    } else {
        Portal::New
    })
}

/// How a record is looked up against a portal.
///
/// Instrument-number lookup is preferred: page numbers in the index are
/// subject to padding ambiguities the recorder's own instrument ids avoid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKey {
    /// Recorder-assigned instrument number.
    Instrument(i64),
    /// Legacy book/page locator.
    BookPage {
        /// Book number.
        book: i64,
        /// Page number.
        page: i64,
    },
}

/// A single lookup request handed to a portal client.
#[derive(Debug, Clone)]
pub struct DocumentLookup {
    /// The lookup key (instrument number preferred).
    pub key: LookupKey,
    /// Portal document-class code (e.g. `01` for DEED).
    pub doc_code: String,
}

impl DocumentLookup {
    /// Creates an instrument-number lookup.
    #[must_use]
    pub fn by_instrument(instrument_number: i64, doc_code: impl Into<String>) -> Self {
        Self {
            key: LookupKey::Instrument(instrument_number),
            doc_code: doc_code.into(),
        }
    }

    /// Creates a book/page lookup.
    #[must_use]
    pub fn by_book_page(book: i64, page: i64, doc_code: impl Into<String>) -> Self {
        Self {
            key: LookupKey::BookPage { book, page },
            doc_code: doc_code.into(),
        }
    }
}

/// Metadata a portal reports about a document.
///
/// `actual_book` / `actual_page` are the server's view of the locator and
/// feed the mismatch check; everything else is best-effort enrichment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentMetadata {
    /// Book number as reported by the portal.
    pub actual_book: Option<i64>,
    /// Page number as reported by the portal.
    pub actual_page: Option<i64>,
    pub grantor: Option<String>,
    pub grantee: Option<String>,
    /// Nature of the instrument as the portal words it.
    pub nature: Option<String>,
    pub file_date: Option<String>,
    pub subdivision: Option<String>,
    pub section: Option<String>,
    pub township: Option<String>,
    pub range: Option<String>,
}

/// Result of a successful portal fetch.
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Metadata parsed from the result page (empty for direct-PDF responses).
    pub metadata: DocumentMetadata,
    /// The document bytes; always a PDF.
    pub pdf_bytes: Vec<u8>,
}

/// Contract every portal client implements.
///
/// Uses `async_trait` so the registry can hold `Box<dyn PortalClient>` -
/// native async traits are not object-safe.
#[async_trait]
pub trait PortalClient: Send + Sync {
    /// The portal this client serves.
    fn portal(&self) -> Portal;

    /// Fetches a document's metadata and PDF bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] describing the failure; every error is one
    /// of the enumerated kinds so callers can apply the retry policy table.
    async fn fetch(&self, lookup: &DocumentLookup) -> Result<FetchResult, FetchError>;
}

/// Per-portal client set.
///
/// Phase 1 registers Historical and Mid only; a `None` from [`Self::get`]
/// means the portal is excluded and the record should have been skipped by
/// the cleaning pass.
pub struct PortalRegistry {
    clients: HashMap<Portal, Arc<dyn PortalClient>>,
}

impl PortalRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    /// Registers a client for its portal, replacing any existing entry.
    pub fn register(&mut self, client: Arc<dyn PortalClient>) {
        self.clients.insert(client.portal(), client);
    }

    /// Returns the client for a portal, if one is registered.
    #[must_use]
    pub fn get(&self, portal: Portal) -> Option<Arc<dyn PortalClient>> {
        self.clients.get(&portal).cloned()
    }
}

impl Default for PortalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PortalRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let portals: Vec<&str> = self.clients.keys().map(Portal::as_str).collect();
        f.debug_struct("PortalRegistry")
            .field("portals", &portals)
            .finish()
    }
}
