//! Index-store data model.
//!
//! One [`IndexDocument`] row exists per recorded document. The row carries
//! the recording locators (book/page, instrument number), classification,
//! party and legal-description metadata from the county index, plus the
//! workflow fields the download pipeline owns ([`DownloadStatus`], attempts,
//! archive path, mismatch flags).

mod document;
mod document_type;

pub use document::{DownloadStatus, IndexDocument, NewIndexDocument, RecordSource};
pub use document_type::{
    doc_type_slug, is_will_type, parse_instrument_type, portal_doc_code, resolve_document_code,
    DocumentType, DEFAULT_PORTAL_DOC_CODE, PORTAL_DOC_CODES,
};
