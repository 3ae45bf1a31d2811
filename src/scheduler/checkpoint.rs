//! Checkpoint files for stats continuity and operator visibility.
//!
//! A checkpoint is a complete snapshot: `{stage, timestamp, queue_state,
//! statistics}`. The store remains the authoritative queue state - on
//! resume the newest checkpoint for the stage only seeds the statistics
//! and reports where the last run had reached.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use super::StatsSnapshot;
use crate::queue::Stage;

/// Errors from checkpoint persistence.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Filesystem error reading or writing a checkpoint.
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Checkpoint JSON could not be produced or parsed.
    #[error("checkpoint serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Cursor portion of a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueState {
    /// Highest record id handed out by the last batch fetch.
    pub last_fetched_id: Option<i64>,
}

/// A complete run snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Stage the run was processing.
    pub stage: String,
    /// When the checkpoint was written (RFC 3339).
    pub timestamp: String,
    /// Queue cursor at write time.
    pub queue_state: QueueState,
    /// Accumulated statistics at write time.
    pub statistics: StatsSnapshot,
}

impl Checkpoint {
    /// Builds a checkpoint for the current instant.
    #[must_use]
    pub fn new(stage: Stage, last_fetched_id: Option<i64>, statistics: StatsSnapshot) -> Self {
        Self {
            stage: stage.as_str().to_string(),
            timestamp: Utc::now().to_rfc3339(),
            queue_state: QueueState { last_fetched_id },
            statistics,
        }
    }

    /// Writes the checkpoint into `dir` with a sortable filename.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] on filesystem or serialization failure.
    #[instrument(skip(self), fields(stage = %self.stage))]
    pub fn write(&self, dir: &Path) -> Result<PathBuf, CheckpointError> {
        std::fs::create_dir_all(dir)?;

        let stamp = Utc::now().format("%Y%m%d-%H%M%S%3f");
        let path = dir.join(format!("checkpoint-{}-{stamp}.json", self.stage));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;

        debug!(path = %path.display(), "checkpoint written");
        Ok(path)
    }

    /// Loads the newest checkpoint for a stage from `dir`, if any.
    ///
    /// Unparseable files are ignored rather than failing the resume; the
    /// checkpoint is advisory state.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Io`] when the directory cannot be read
    /// (a missing directory is simply no checkpoint).
    #[instrument]
    pub fn load_latest(dir: &Path, stage: Stage) -> Result<Option<Self>, CheckpointError> {
        if !dir.exists() {
            return Ok(None);
        }

        let prefix = format!("checkpoint-{}-", stage.as_str());
        let mut names: Vec<String> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with(&prefix) && name.ends_with(".json"))
            .collect();

        // Filenames embed a zero-padded UTC stamp, so lexicographic order
        // is chronological.
        names.sort_unstable();

        for name in names.into_iter().rev() {
            let raw = std::fs::read_to_string(dir.join(&name))?;
            match serde_json::from_str::<Self>(&raw) {
                Ok(checkpoint) => {
                    debug!(file = %name, "loaded checkpoint");
                    return Ok(Some(checkpoint));
                }
                Err(e) => {
                    debug!(file = %name, error = %e, "skipping unparseable checkpoint");
                }
            }
        }

        Ok(None)
    }
}
