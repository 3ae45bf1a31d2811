//! Object-archive contract and the filesystem implementation.
//!
//! Archived PDFs are content-addressed: every upload records the SHA-256 of
//! the stored bytes, and re-uploading identical bytes to the same remote
//! path is a no-op returning the existing URI. That idempotence is what
//! makes crash recovery safe - a record re-processed after a crash lands on
//! the same object.
//!
//! The production object store (GCS) is an external collaborator; this
//! module pins down its contract in [`ObjectArchive`] and ships
//! [`FsArchive`], a filesystem archive with the same semantics used by
//! local runs and tests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::index::doc_type_slug;
use crate::portal::MID_PORTAL_FIRST_BOOK;

/// Default overall deadline for a retried upload.
pub const DEFAULT_UPLOAD_DEADLINE: Duration = Duration::from_secs(60);

/// Base delay for upload retry backoff.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Cap on a single backoff sleep.
const RETRY_MAX_DELAY: Duration = Duration::from_secs(8);

/// Maximum jitter added to each backoff sleep.
const RETRY_MAX_JITTER_MS: u64 = 500;

/// Book number where the archive layout switches from `mid-early` to
/// `mid-recent`.
const MID_RECENT_FIRST_BOOK: i64 = 2000;

/// Errors from archive operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The local file to upload does not exist.
    #[error("local file not found: {path}")]
    LocalFileMissing {
        /// The missing path.
        path: PathBuf,
    },

    /// Filesystem error reading or writing archive content.
    #[error("archive I/O error on {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The store rejected the upload.
    #[error("upload failed for {remote_path}: {detail}")]
    UploadFailed {
        /// Destination path in the archive.
        remote_path: String,
        /// Short human-readable description.
        detail: String,
    },
}

impl ArchiveError {
    /// Creates an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the stable stats-bucket key for this error.
    #[must_use]
    pub fn kind_key(&self) -> &'static str {
        "upload_failure"
    }
}

/// Metadata attached to every archived object.
///
/// Null index fields are normalized here rather than at call sites:
/// a missing document type uploads as `"unknown"`, a missing instrument
/// number as `"0"`, a missing instrument type as `""`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub book: String,
    pub page: String,
    pub instrument_number: String,
    pub document_type: String,
    pub instrument_type: String,
    pub original_size: String,
    pub optimized_size: String,
}

impl ArchiveMetadata {
    /// Builds metadata from index fields, normalizing nulls.
    #[must_use]
    pub fn new(
        book: i64,
        page: i64,
        instrument_number: Option<i64>,
        document_type: Option<&str>,
        instrument_type: Option<&str>,
        original_size: u64,
        optimized_size: u64,
    ) -> Self {
        Self {
            book: book.to_string(),
            page: page.to_string(),
            instrument_number: instrument_number.unwrap_or(0).to_string(),
            document_type: doc_type_slug(document_type),
            instrument_type: instrument_type.unwrap_or_default().to_string(),
            original_size: original_size.to_string(),
            optimized_size: optimized_size.to_string(),
        }
    }
}

/// Result of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// URI of the stored object.
    pub uri: String,
    /// SHA-256 of the stored bytes, lowercase hex.
    pub checksum: String,
    /// True when the object already existed with a matching checksum.
    pub already_existed: bool,
}

/// Contract for the object archive.
///
/// Implementations must be idempotent: an object already present at
/// `remote_path` whose recorded checksum matches the new content is left
/// alone and its URI returned.
#[async_trait]
pub trait ObjectArchive: Send + Sync {
    /// Uploads a local file to `remote_path` with metadata.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] when the local file is missing or the store
    /// rejects the write.
    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        metadata: &ArchiveMetadata,
    ) -> Result<UploadOutcome, ArchiveError>;
}

/// Builds the archive path for a document.
///
/// Layout: `documents/{historical|mid-early|mid-recent}/{doc-type}/{BBBB}-{PPPP}.pdf`
/// with book and page zero-padded to four digits and the document-type
/// token in lower-kebab-case (`unknown` when unclassified).
#[must_use]
pub fn remote_path_for(book: i64, page: i64, document_type: Option<&str>) -> String {
    let range = if book < MID_PORTAL_FIRST_BOOK {
        "historical"
    } else if book < MID_RECENT_FIRST_BOOK {
        "mid-early"
    } else {
        "mid-recent"
    };
    let slug = doc_type_slug(document_type);
    format!("documents/{range}/{slug}/{book:04}-{page:04}.pdf")
}

/// Uploads with exponential backoff until the deadline elapses.
///
/// # Errors
///
/// Returns the last [`ArchiveError`] once the deadline is exhausted.
/// Missing-local-file errors are not retried - waiting cannot make the
/// file appear.
#[instrument(skip(archive, metadata), fields(remote_path))]
pub async fn upload_with_retry(
    archive: &dyn ObjectArchive,
    local_path: &Path,
    remote_path: &str,
    metadata: &ArchiveMetadata,
    deadline: Duration,
) -> Result<UploadOutcome, ArchiveError> {
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        match archive.upload(local_path, remote_path, metadata).await {
            Ok(outcome) => return Ok(outcome),
            Err(error @ ArchiveError::LocalFileMissing { .. }) => return Err(error),
            Err(error) => {
                attempt += 1;
                let backoff = RETRY_BASE_DELAY
                    .saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
                    .min(RETRY_MAX_DELAY);
                let jitter =
                    Duration::from_millis(rand::thread_rng().gen_range(0..=RETRY_MAX_JITTER_MS));
                let delay = backoff + jitter;

                if started.elapsed() + delay >= deadline {
                    warn!(attempt, error = %error, "upload deadline exhausted");
                    return Err(error);
                }

                warn!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "retrying upload"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Sidecar record stored next to each archived object.
#[derive(Debug, Serialize, Deserialize)]
struct ObjectRecord {
    checksum: String,
    upload_time: String,
    metadata: ArchiveMetadata,
}

/// Filesystem-backed archive.
///
/// Objects live under a root directory mirroring the remote path layout;
/// each object carries a `.meta.json` sidecar holding its checksum and
/// metadata. Writes are atomic (temp file + rename) so a crashed upload
/// never leaves a torn object.
#[derive(Debug, Clone)]
pub struct FsArchive {
    root: PathBuf,
}

impl FsArchive {
    /// Creates an archive rooted at the given directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the archive root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, remote_path: &str) -> PathBuf {
        self.root.join(remote_path)
    }

    fn sidecar_path(&self, remote_path: &str) -> PathBuf {
        self.root.join(format!("{remote_path}.meta.json"))
    }

    fn uri_for(&self, remote_path: &str) -> String {
        format!("file://{}", self.object_path(remote_path).display())
    }

    /// Reads the recorded checksum of an existing object, if any.
    fn existing_checksum(&self, remote_path: &str) -> Option<String> {
        let sidecar = self.sidecar_path(remote_path);
        let raw = std::fs::read_to_string(sidecar).ok()?;
        let record: ObjectRecord = serde_json::from_str(&raw).ok()?;
        Some(record.checksum)
    }
}

/// Computes the SHA-256 of a file as lowercase hex.
///
/// # Errors
///
/// Returns [`ArchiveError::Io`] when the file cannot be read.
pub fn sha256_file(path: &Path) -> Result<String, ArchiveError> {
    let bytes = std::fs::read(path).map_err(|e| ArchiveError::io(path, e))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

#[async_trait]
impl ObjectArchive for FsArchive {
    #[instrument(skip(self, metadata), fields(remote_path))]
    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        metadata: &ArchiveMetadata,
    ) -> Result<UploadOutcome, ArchiveError> {
        if !local_path.exists() {
            return Err(ArchiveError::LocalFileMissing {
                path: local_path.to_path_buf(),
            });
        }

        let checksum = sha256_file(local_path)?;
        let target = self.object_path(remote_path);

        if target.exists() {
            if let Some(existing) = self.existing_checksum(remote_path) {
                if existing == checksum {
                    debug!(remote_path, "object already archived with same checksum");
                    return Ok(UploadOutcome {
                        uri: self.uri_for(remote_path),
                        checksum,
                        already_existed: true,
                    });
                }
            }
        }

        let parent = target
            .parent()
            .ok_or_else(|| ArchiveError::UploadFailed {
                remote_path: remote_path.to_string(),
                detail: "remote path has no parent directory".to_string(),
            })?;
        std::fs::create_dir_all(parent).map_err(|e| ArchiveError::io(parent, e))?;

        // Atomic write: stage in the destination directory, then rename.
        let staged = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| ArchiveError::io(parent, e))?;
        std::fs::copy(local_path, staged.path())
            .map_err(|e| ArchiveError::io(staged.path(), e))?;
        staged
            .persist(&target)
            .map_err(|e| ArchiveError::io(&target, e.error))?;

        let record = ObjectRecord {
            checksum: checksum.clone(),
            upload_time: Utc::now().to_rfc3339(),
            metadata: metadata.clone(),
        };
        let sidecar = self.sidecar_path(remote_path);
        let record_json =
            serde_json::to_string_pretty(&record).map_err(|e| ArchiveError::UploadFailed {
                remote_path: remote_path.to_string(),
                detail: format!("metadata serialization failed: {e}"),
            })?;
        std::fs::write(&sidecar, record_json).map_err(|e| ArchiveError::io(&sidecar, e))?;

        info!(remote_path, checksum = %checksum, "archived object");
        Ok(UploadOutcome {
            uri: self.uri_for(remote_path),
            checksum,
            already_existed: false,
        })
    }
}
