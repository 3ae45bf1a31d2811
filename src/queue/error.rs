//! Error types for queue operations.

use thiserror::Error;

/// Errors from queue operations against the index store.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Underlying database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No index row exists with the given id.
    #[error("index document not found: {0}")]
    DocumentNotFound(i64),

    /// An unknown stage name was requested.
    #[error("unknown stage: {0}")]
    UnknownStage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_not_found_display() {
        let error = QueueError::DocumentNotFound(42);
        assert!(error.to_string().contains("42"));
        assert!(error.to_string().contains("not found"));
    }

    #[test]
    fn test_unknown_stage_display() {
        let error = QueueError::UnknownStage("stage-9".to_string());
        assert!(error.to_string().contains("stage-9"));
    }
}
