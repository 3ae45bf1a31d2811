//! PDF optimization via Ghostscript.
//!
//! Rewrites downloaded PDFs to a smaller, standards-normalized form:
//! images downsampled to the target DPI, fonts subset, duplicate images
//! deduplicated. Optimization is strictly best-effort - any failure
//! (Ghostscript missing, non-zero exit, hard timeout, torn output)
//! downgrades to using the original bytes, never to failing the record.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Hard ceiling on a single Ghostscript invocation.
pub const DEFAULT_OPTIMIZE_TIMEOUT: Duration = Duration::from_secs(120);

/// Default JPEG quality for recompressed images.
pub const DEFAULT_QUALITY: u32 = 85;

/// Default target resolution; visual content is preserved at or above this.
pub const DEFAULT_DPI: u32 = 150;

/// Errors from optimizer operations.
///
/// Only local I/O problems surface as errors; Ghostscript failures are
/// soft and reported through [`OptimizeReport::used_fallback`].
#[derive(Debug, Error)]
pub enum OptimizeError {
    /// The input file does not exist or cannot be read.
    #[error("optimizer I/O error on {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl OptimizeError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Size accounting from one optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimizeReport {
    /// Input size in bytes.
    pub original_size: u64,
    /// Output size in bytes (equals `original_size` on fallback).
    pub optimized_size: u64,
    /// True when the original bytes were used because optimization failed
    /// or produced something larger/invalid.
    pub used_fallback: bool,
}

impl OptimizeReport {
    /// Bytes saved by optimization.
    #[must_use]
    pub fn savings(&self) -> u64 {
        self.original_size.saturating_sub(self.optimized_size)
    }
}

/// Ghostscript-backed PDF optimizer.
#[derive(Debug, Clone)]
pub struct PdfOptimizer {
    quality: u32,
    dpi: u32,
    timeout: Duration,
    /// Resolved `gs` binary; `None` means every call falls back.
    gs_binary: Option<PathBuf>,
}

impl PdfOptimizer {
    /// Creates an optimizer, locating Ghostscript on PATH.
    #[must_use]
    pub fn new(quality: u32, dpi: u32, timeout: Duration) -> Self {
        let gs_binary = which::which("gs").ok();
        match &gs_binary {
            Some(path) => debug!(gs = %path.display(), "Ghostscript available"),
            None => warn!("Ghostscript not found; optimizer will pass originals through"),
        }

        Self {
            quality,
            dpi,
            timeout,
            gs_binary,
        }
    }

    /// Creates an optimizer with the default quality/DPI/timeout.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_QUALITY, DEFAULT_DPI, DEFAULT_OPTIMIZE_TIMEOUT)
    }

    /// Returns whether Ghostscript was found.
    #[must_use]
    pub fn ghostscript_available(&self) -> bool {
        self.gs_binary.is_some()
    }

    /// Optimizes `input` into `output` (produce-new-file mode).
    ///
    /// On any optimization failure the original bytes are copied to
    /// `output` and the report is flagged as fallback. `input` is never
    /// modified.
    ///
    /// # Errors
    ///
    /// Returns [`OptimizeError::Io`] only for local filesystem problems
    /// with the input or output paths.
    #[instrument(skip(self), fields(input = %input.display()))]
    pub async fn optimize_to(
        &self,
        input: &Path,
        output: &Path,
    ) -> Result<OptimizeReport, OptimizeError> {
        let original_size = std::fs::metadata(input)
            .map_err(|e| OptimizeError::io(input, e))?
            .len();

        if let Some(optimized_size) = self.run_ghostscript(input, output).await {
            if optimized_size > 0 && optimized_size < original_size {
                info!(
                    original_size,
                    optimized_size,
                    "optimized PDF"
                );
                return Ok(OptimizeReport {
                    original_size,
                    optimized_size,
                    used_fallback: false,
                });
            }
            debug!(
                original_size,
                optimized_size, "optimized output not smaller; keeping original"
            );
        }

        // Fallback: the original bytes are the output.
        std::fs::copy(input, output).map_err(|e| OptimizeError::io(output, e))?;
        Ok(OptimizeReport {
            original_size,
            optimized_size: original_size,
            used_fallback: true,
        })
    }

    /// Optimizes a file in place, atomically.
    ///
    /// The optimized output is staged as a sibling temp file and renamed
    /// over the original only on success; any failure leaves the original
    /// intact and reports fallback.
    ///
    /// # Errors
    ///
    /// Returns [`OptimizeError::Io`] only for local filesystem problems.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn optimize_in_place(&self, path: &Path) -> Result<OptimizeReport, OptimizeError> {
        let original_size = std::fs::metadata(path)
            .map_err(|e| OptimizeError::io(path, e))?
            .len();

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let staged = tempfile::Builder::new()
            .prefix(".optimize-")
            .suffix(".pdf")
            .tempfile_in(dir)
            .map_err(|e| OptimizeError::io(dir, e))?;

        if let Some(optimized_size) = self.run_ghostscript(path, staged.path()).await {
            if optimized_size > 0 && optimized_size < original_size {
                staged
                    .persist(path)
                    .map_err(|e| OptimizeError::io(path, e.error))?;
                info!(original_size, optimized_size, "optimized PDF in place");
                return Ok(OptimizeReport {
                    original_size,
                    optimized_size,
                    used_fallback: false,
                });
            }
        }

        // Temp file is cleaned up on drop; original untouched.
        Ok(OptimizeReport {
            original_size,
            optimized_size: original_size,
            used_fallback: true,
        })
    }

    /// Runs Ghostscript, returning the output size on success.
    ///
    /// `None` covers every soft failure: missing binary, spawn error,
    /// non-zero exit, timeout, or output that is not a PDF.
    async fn run_ghostscript(&self, input: &Path, output: &Path) -> Option<u64> {
        let gs = self.gs_binary.as_ref()?;

        let mut command = Command::new(gs);
        command
            .arg("-sDEVICE=pdfwrite")
            .arg("-dCompatibilityLevel=1.4")
            .arg("-dPDFSETTINGS=/ebook")
            .arg("-dNOPAUSE")
            .arg("-dBATCH")
            .arg("-dQUIET")
            .arg(format!("-dJPEGQ={}", self.quality))
            .arg(format!("-dColorImageResolution={}", self.dpi))
            .arg(format!("-dGrayImageResolution={}", self.dpi))
            .arg(format!("-dMonoImageResolution={}", self.dpi))
            .arg("-dColorImageDownsampleType=/Bicubic")
            .arg("-dGrayImageDownsampleType=/Bicubic")
            .arg("-dMonoImageDownsampleType=/Bicubic")
            .arg("-dColorImageDownsampleThreshold=1.0")
            .arg("-dGrayImageDownsampleThreshold=1.0")
            .arg("-dMonoImageDownsampleThreshold=1.0")
            .arg("-dCompressFonts=true")
            .arg("-dEmbedAllFonts=false")
            .arg("-dSubsetFonts=true")
            .arg("-dDetectDuplicateImages=true")
            .arg(format!("-sOutputFile={}", output.display()))
            .arg(input)
            .kill_on_drop(true);

        let result = tokio::time::timeout(self.timeout, command.output()).await;

        match result {
            Ok(Ok(output_status)) if output_status.status.success() => {
                let size = std::fs::metadata(output).ok()?.len();
                if is_pdf_file(output) {
                    Some(size)
                } else {
                    warn!("Ghostscript produced non-PDF output; falling back");
                    None
                }
            }
            Ok(Ok(output_status)) => {
                warn!(
                    code = ?output_status.status.code(),
                    stderr = %String::from_utf8_lossy(&output_status.stderr),
                    "Ghostscript exited non-zero; falling back"
                );
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, "failed to run Ghostscript; falling back");
                None
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "Ghostscript timed out; falling back"
                );
                None
            }
        }
    }
}

/// Checks the `%PDF-` magic at the start of a file.
fn is_pdf_file(path: &Path) -> bool {
    std::fs::read(path)
        .map(|bytes| bytes.starts_with(b"%PDF-"))
        .unwrap_or(false)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Optimizer with Ghostscript lookup forced to miss, for deterministic
    /// fallback behavior in CI.
    fn fallback_optimizer() -> PdfOptimizer {
        PdfOptimizer {
            quality: DEFAULT_QUALITY,
            dpi: DEFAULT_DPI,
            timeout: DEFAULT_OPTIMIZE_TIMEOUT,
            gs_binary: None,
        }
    }

    #[test]
    fn test_report_savings() {
        let report = OptimizeReport {
            original_size: 1000,
            optimized_size: 400,
            used_fallback: false,
        };
        assert_eq!(report.savings(), 600);
    }

    #[test]
    fn test_report_savings_never_underflows() {
        let report = OptimizeReport {
            original_size: 400,
            optimized_size: 400,
            used_fallback: true,
        };
        assert_eq!(report.savings(), 0);
    }

    #[tokio::test]
    async fn test_optimize_to_fallback_copies_original() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        std::fs::write(&input, b"%PDF-1.4 original").unwrap();

        let report = fallback_optimizer()
            .optimize_to(&input, &output)
            .await
            .unwrap();

        assert!(report.used_fallback);
        assert_eq!(report.original_size, report.optimized_size);
        assert_eq!(std::fs::read(output).unwrap(), b"%PDF-1.4 original");
        // Input untouched
        assert_eq!(std::fs::read(input).unwrap(), b"%PDF-1.4 original");
    }

    #[tokio::test]
    async fn test_optimize_in_place_fallback_leaves_original_intact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, b"%PDF-1.4 content").unwrap();

        let report = fallback_optimizer().optimize_in_place(&path).await.unwrap();

        assert!(report.used_fallback);
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4 content");

        // No stray temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".optimize-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_optimize_to_missing_input_errors() {
        let dir = TempDir::new().unwrap();
        let result = fallback_optimizer()
            .optimize_to(&dir.path().join("missing.pdf"), &dir.path().join("out.pdf"))
            .await;
        assert!(matches!(result, Err(OptimizeError::Io { .. })));
    }

    #[test]
    fn test_is_pdf_file() {
        let dir = TempDir::new().unwrap();
        let pdf = dir.path().join("a.pdf");
        let other = dir.path().join("b.txt");
        std::fs::write(&pdf, b"%PDF-1.7").unwrap();
        std::fs::write(&other, b"hello").unwrap();

        assert!(is_pdf_file(&pdf));
        assert!(!is_pdf_file(&other));
        assert!(!is_pdf_file(&dir.path().join("missing")));
    }
}
