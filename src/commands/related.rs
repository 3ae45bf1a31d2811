//! `deedpull parse-related` - the cross-reference enrichment pass.

use anyhow::Result;
use tracing::info;

use deedpull_core::config::Settings;
use deedpull_core::related::RelatedItemsParser;

use super::open_queue;

/// Runs the related-items parser.
pub async fn run_parse_related(
    settings: &Settings,
    dry_run: bool,
    batch_size: i64,
    stats_only: bool,
) -> Result<()> {
    let queue = open_queue(settings, 1).await?;
    let parser = RelatedItemsParser::new(queue, batch_size);

    if stats_only {
        let stats = parser.stats().await?;
        println!("Related-items coverage:");
        println!("  total rows       {:>10}", stats.total_rows);
        println!("  with raw text    {:>10}", stats.rows_with_raw);
        println!("  already parsed   {:>10}", stats.rows_parsed);
        return Ok(());
    }

    info!(dry_run, batch_size, "running related-items parser");
    let report = parser.run(dry_run).await?;

    println!(
        "Related-items pass {}:",
        if dry_run { "(dry run)" } else { "complete" }
    );
    println!("  rows examined     {:>10}", report.rows_processed);
    println!("  rows with refs    {:>10}", report.rows_with_refs);
    println!("  refs parsed       {:>10}", report.refs_parsed);
    println!("  refs matched      {:>10}", report.refs_matched);
    println!("  rows updated      {:>10}", report.rows_updated);

    Ok(())
}
