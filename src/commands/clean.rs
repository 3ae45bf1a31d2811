//! `deedpull clean` - the index cleaning pass.

use anyhow::Result;
use tracing::info;

use deedpull_core::config::Settings;

use super::open_queue;

/// Runs the cleaning pass (or just reports, per the flags).
pub async fn run_clean(settings: &Settings, dry_run: bool, report_only: bool) -> Result<()> {
    let queue = open_queue(settings, 1).await?;

    if report_only {
        println!("Index status:");
        for (status, count) in queue.status_counts().await? {
            println!("  {status:<12} {count:>10}");
        }
        println!("\nPending priorities:");
        for (priority, count) in queue.priority_counts().await? {
            match priority {
                Some(priority) => println!("  priority {priority}  {count:>10}"),
                None => println!("  unassigned  {count:>10}"),
            }
        }
        return Ok(());
    }

    info!(dry_run, "running cleaning pass");
    let report = queue.clean(dry_run).await?;

    let verb = if dry_run { "would skip" } else { "skipped" };
    println!("Cleaning pass {}:", if dry_run { "(dry run)" } else { "complete" });
    println!("  invalid records   {verb:<10} {:>8}", report.invalid_records);
    println!("  excluded portal   {verb:<10} {:>8}", report.excluded_portal);
    println!("  duplicates        {verb:<10} {:>8}", report.duplicates);
    println!(
        "  priorities        {:<10} {:>8}",
        if dry_run { "would set" } else { "assigned" },
        report.priorities_assigned
    );

    Ok(())
}
