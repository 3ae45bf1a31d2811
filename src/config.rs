//! Environment-derived settings.
//!
//! Everything operational is configured through the environment (a `.env`
//! file is honored); CLI flags override the worker count and stage
//! selection per run. Defaults are tuned for the county portal's tolerance
//! and the size distribution of recorded documents.

use std::path::PathBuf;
use std::time::Duration;

use tracing::instrument;

/// Default minimum spacing between portal requests (seconds).
const DEFAULT_RATE_LIMIT_DELAY_SECS: f64 = 0.5;

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Path of the SQLite index store.
    pub db_path: PathBuf,
    /// Object-archive bucket name, used in reports.
    pub gcs_bucket_name: String,
    /// Service-account credentials for the production archive.
    pub gcp_credentials_path: Option<PathBuf>,
    /// Root directory of the filesystem archive.
    pub archive_dir: PathBuf,
    /// Directory URL the portal lookup endpoint hangs off.
    pub portal_base_url: String,
    /// Scratch directory for in-flight downloads.
    pub temp_download_dir: PathBuf,
    /// Directory for checkpoint files.
    pub checkpoint_dir: PathBuf,
    /// Per-request HTTP deadline.
    pub request_timeout: Duration,
    /// Default worker count for download runs.
    pub concurrent_downloads: usize,
    /// Minimum spacing between portal request starts.
    pub rate_limit_delay: Duration,
    /// JPEG quality for PDF optimization.
    pub pdf_compression_quality: u32,
    /// Target DPI for PDF optimization.
    pub pdf_dpi: u32,
    /// User-Agent sent to the portal; the server rejects empty UA.
    pub user_agent: String,
}

impl Settings {
    /// Builds settings from the environment, loading `.env` first.
    #[must_use]
    #[instrument]
    pub fn from_env() -> Self {
        // Missing .env is the normal case outside development.
        dotenvy::dotenv().ok();

        let rate_limit_secs = env_parse("RATE_LIMIT_DELAY", DEFAULT_RATE_LIMIT_DELAY_SECS);

        Self {
            db_path: env_path("DB_PATH", "index.db"),
            gcs_bucket_name: env_string("GCS_BUCKET_NAME", "county-title-plant"),
            gcp_credentials_path: std::env::var("GOOGLE_APPLICATION_CREDENTIALS")
                .ok()
                .map(PathBuf::from),
            archive_dir: env_path("ARCHIVE_DIR", "archive"),
            portal_base_url: env_string(
                "PORTAL_BASE_URL",
                "https://tools.madison-co.net/elected-offices/chancery-clerk/court-house-search",
            ),
            temp_download_dir: env_path("TEMP_DOWNLOAD_DIR", "temp/downloads"),
            checkpoint_dir: env_path("CHECKPOINT_DIR", "checkpoints"),
            request_timeout: Duration::from_secs(env_parse("REQUEST_TIMEOUT", 30_u64)),
            concurrent_downloads: env_parse("CONCURRENT_DOWNLOADS", 5_usize),
            rate_limit_delay: Duration::from_secs_f64(rate_limit_secs.max(0.0)),
            pdf_compression_quality: env_parse("PDF_COMPRESSION_QUALITY", 85_u32),
            pdf_dpi: env_parse("PDF_DPI", 150_u32),
            user_agent: env_string(
                "USER_AGENT",
                "deedpull/0.1 (county-records acquisition pipeline)",
            ),
        }
    }

    /// Creates the scratch, checkpoint and archive directories.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when a directory cannot be created.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [
            &self.temp_download_dir,
            &self.checkpoint_dir,
            &self.archive_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_path(key: &str, default: &str) -> PathBuf {
    PathBuf::from(env_string(key, default))
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // Environment-variable tests mutate process state; each test uses its
    // own variable names to stay independent of execution order.

    #[test]
    fn test_env_string_default() {
        assert_eq!(env_string("DEEDPULL_TEST_UNSET_A", "fallback"), "fallback");
    }

    #[test]
    fn test_env_string_reads_value() {
        std::env::set_var("DEEDPULL_TEST_SET_B", "custom");
        assert_eq!(env_string("DEEDPULL_TEST_SET_B", "fallback"), "custom");
        std::env::remove_var("DEEDPULL_TEST_SET_B");
    }

    #[test]
    fn test_env_string_blank_falls_back() {
        std::env::set_var("DEEDPULL_TEST_BLANK_C", "   ");
        assert_eq!(env_string("DEEDPULL_TEST_BLANK_C", "fallback"), "fallback");
        std::env::remove_var("DEEDPULL_TEST_BLANK_C");
    }

    #[test]
    fn test_env_parse_default_on_garbage() {
        std::env::set_var("DEEDPULL_TEST_GARBAGE_D", "not-a-number");
        assert_eq!(env_parse("DEEDPULL_TEST_GARBAGE_D", 42_u32), 42);
        std::env::remove_var("DEEDPULL_TEST_GARBAGE_D");
    }

    #[test]
    fn test_env_parse_reads_number() {
        std::env::set_var("DEEDPULL_TEST_NUM_E", "7");
        assert_eq!(env_parse("DEEDPULL_TEST_NUM_E", 42_u32), 7);
        std::env::remove_var("DEEDPULL_TEST_NUM_E");
    }

    #[test]
    fn test_settings_defaults_are_sane() {
        let settings = Settings::from_env();
        assert!(settings.concurrent_downloads >= 1);
        assert!(settings.request_timeout >= Duration::from_secs(1));
        assert!(!settings.user_agent.is_empty());
        assert!(settings.portal_base_url.starts_with("http"));
    }
}
