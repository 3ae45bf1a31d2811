//! Read-only status views: `validate`, `report`, `monitor`.

use anyhow::Result;

use deedpull_core::config::Settings;

use super::open_queue;

/// `deedpull validate` - sanity-checks recent completions.
pub async fn run_validate(settings: &Settings, last_hours: i64) -> Result<()> {
    let queue = open_queue(settings, 1).await?;
    let recent = queue.recently_completed(last_hours, 10_000).await?;

    let total = recent.len();
    let missing_uri = recent.iter().filter(|d| d.gcs_path.is_none()).count();
    let mismatches = recent.iter().filter(|d| d.book_page_mismatch).count();

    println!("Completions in the last {last_hours}h: {total}");
    println!("  with archive URI  {:>8}", total - missing_uri);
    println!("  missing URI       {missing_uri:>8}");
    println!("  locator mismatch  {mismatches:>8}");

    if missing_uri > 0 {
        println!("\nWARNING: completed rows without an archive URI violate the");
        println!("completion invariant; inspect these ids:");
        for doc in recent.iter().filter(|d| d.gcs_path.is_none()).take(20) {
            println!("  id {}  book {:?} page {:?}", doc.id, doc.book, doc.page);
        }
    }

    Ok(())
}

/// `deedpull report` - the full pipeline status report.
pub async fn run_report(settings: &Settings) -> Result<()> {
    let queue = open_queue(settings, 1).await?;

    println!("Pipeline status");
    println!("===============");
    for (status, count) in queue.status_counts().await? {
        println!("  {status:<12} {count:>10}");
    }

    println!("\nPending by priority:");
    for (priority, count) in queue.priority_counts().await? {
        match priority {
            Some(priority) => println!("  priority {priority}   {count:>10}"),
            None => println!("  unassigned   {count:>10}"),
        }
    }

    let errors = queue.error_counts(10).await?;
    if !errors.is_empty() {
        println!("\nTop failure/skip reasons:");
        for (error, count) in errors {
            println!("  {count:>8}  {error}");
        }
    }

    Ok(())
}

/// `deedpull monitor` - compact queue health view.
pub async fn run_monitor(settings: &Settings) -> Result<()> {
    let queue = open_queue(settings, 1).await?;

    let counts = queue.status_counts().await?;
    let line = counts
        .iter()
        .map(|(status, count)| format!("{status}={count}"))
        .collect::<Vec<_>>()
        .join("  ");
    println!("{line}");

    let failures = queue.recent_failures(5).await?;
    if !failures.is_empty() {
        println!("recent failures:");
        for doc in failures {
            println!(
                "  id {}  book {:?} page {:?}  attempts {}  {}",
                doc.id,
                doc.book,
                doc.page,
                doc.download_attempts,
                doc.download_error.as_deref().unwrap_or("-")
            );
        }
    }

    Ok(())
}
