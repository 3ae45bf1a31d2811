//! Subcommand implementations for the `deedpull` binary.

mod clean;
mod download;
mod related;
mod status;

pub use clean::run_clean;
pub use download::run_download;
pub use related::run_parse_related;
pub use status::{run_monitor, run_report, run_validate};

use anyhow::Result;
use deedpull_core::config::Settings;
use deedpull_core::db::Database;
use deedpull_core::queue::Queue;

/// Opens the index store and wraps it in a queue.
///
/// Pool size covers the worker count plus slack for the scheduler's own
/// bookkeeping queries.
pub(crate) async fn open_queue(settings: &Settings, workers: usize) -> Result<Queue> {
    let max_connections = u32::try_from(workers).unwrap_or(5) + 2;
    let db = Database::new(&settings.db_path, max_connections).await?;
    Ok(Queue::new(db))
}
