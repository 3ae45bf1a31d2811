//! CLI entry point for the deedpull pipeline.

use clap::Parser;
use deedpull_core::Settings;
use tracing::{debug, error};

mod cli;
mod commands;

use cli::{Cli, Command};

/// Exit code for operator interrupts, per shell convention.
const EXIT_INTERRUPTED: i32 = 130;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Cli::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return 1;
        }
    };

    let settings = Settings::from_env();
    let show_progress = !args.quiet;

    let result = runtime.block_on(async {
        match args.command {
            Command::Clean {
                dry_run,
                report_only,
            } => commands::run_clean(&settings, dry_run, report_only)
                .await
                .map(|()| 0),
            Command::ParseRelated {
                dry_run,
                batch_size,
                stats_only,
            } => commands::run_parse_related(&settings, dry_run, batch_size, stats_only)
                .await
                .map(|()| 0),
            Command::Download {
                stage,
                workers,
                dry_run,
                resume,
            } => commands::run_download(
                &settings,
                stage,
                usize::from(workers),
                dry_run,
                resume,
                show_progress,
            )
            .await
            .map(|interrupted| if interrupted { EXIT_INTERRUPTED } else { 0 }),
            Command::Validate { last_hours } => commands::run_validate(&settings, last_hours)
                .await
                .map(|()| 0),
            Command::Report => commands::run_report(&settings).await.map(|()| 0),
            Command::Monitor => commands::run_monitor(&settings).await.map(|()| 0),
        }
    });

    match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = ?e, "command failed");
            eprintln!("error: {e:#}");
            1
        }
    }
}
