//! CLI argument definitions using clap derive macros.

use clap::{Parser, Subcommand};

use deedpull_core::queue::Stage;
use deedpull_core::related::DEFAULT_BATCH_SIZE;
use deedpull_core::scheduler::DEFAULT_WORKERS;

/// County land-records document acquisition pipeline.
///
/// Cleans the ingested index, parses cross-references, and drives the
/// staged, resumable download/optimize/archive pipeline against the county
/// portals.
#[derive(Parser, Debug)]
#[command(name = "deedpull")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Pipeline subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the index cleaning pass (invalid rows, exclusions, dedup, priorities)
    Clean {
        /// Count what would change without writing
        #[arg(long)]
        dry_run: bool,

        /// Only print current index quality counts; change nothing
        #[arg(long)]
        report_only: bool,
    },

    /// Parse related-items cross-references into structured JSON
    ParseRelated {
        /// Parse and cross-reference without writing back
        #[arg(long)]
        dry_run: bool,

        /// Rows per processing batch
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: i64,

        /// Only print parse-coverage counts; change nothing
        #[arg(long)]
        stats_only: bool,
    },

    /// Run the download pipeline for a stage
    Download {
        /// Stage to process (test, historical-all, small, medium, large, retry-failed)
        #[arg(long)]
        stage: Stage,

        /// Parallel worker count (1-20)
        #[arg(long, default_value_t = DEFAULT_WORKERS as u8, value_parser = clap::value_parser!(u8).range(1..=20))]
        workers: u8,

        /// Show what the stage would process without downloading
        #[arg(long)]
        dry_run: bool,

        /// Seed statistics from the newest checkpoint for the stage
        #[arg(long)]
        resume: bool,
    },

    /// Validate recent downloads (read-only)
    Validate {
        /// Look-back window in hours
        #[arg(long, default_value_t = 24)]
        last_hours: i64,
    },

    /// Print a full pipeline status report (read-only)
    Report,

    /// Print a compact queue health view (read-only)
    Monitor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_clean_parses() {
        let cli = Cli::try_parse_from(["deedpull", "clean"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Clean {
                dry_run: false,
                report_only: false
            }
        ));
    }

    #[test]
    fn test_cli_clean_flags() {
        let cli = Cli::try_parse_from(["deedpull", "clean", "--dry-run", "--report-only"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Clean {
                dry_run: true,
                report_only: true
            }
        ));
    }

    #[test]
    fn test_cli_parse_related_defaults() {
        let cli = Cli::try_parse_from(["deedpull", "parse-related"]).unwrap();
        match cli.command {
            Command::ParseRelated {
                dry_run,
                batch_size,
                stats_only,
            } => {
                assert!(!dry_run);
                assert!(!stats_only);
                assert_eq!(batch_size, DEFAULT_BATCH_SIZE);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_download_requires_stage() {
        let result = Cli::try_parse_from(["deedpull", "download"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_download_parses_stage() {
        let cli = Cli::try_parse_from(["deedpull", "download", "--stage", "small"]).unwrap();
        match cli.command {
            Command::Download { stage, workers, .. } => {
                assert_eq!(stage, Stage::Small);
                assert_eq!(usize::from(workers), DEFAULT_WORKERS);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_download_rejects_unknown_stage() {
        let result = Cli::try_parse_from(["deedpull", "download", "--stage", "everything"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_download_workers_bounds() {
        let ok = Cli::try_parse_from(["deedpull", "download", "--stage", "test", "--workers", "20"]);
        assert!(ok.is_ok());

        let too_many =
            Cli::try_parse_from(["deedpull", "download", "--stage", "test", "--workers", "21"]);
        assert!(too_many.is_err());

        let zero =
            Cli::try_parse_from(["deedpull", "download", "--stage", "test", "--workers", "0"]);
        assert!(zero.is_err());
    }

    #[test]
    fn test_cli_validate_default_window() {
        let cli = Cli::try_parse_from(["deedpull", "validate"]).unwrap();
        match cli.command {
            Command::Validate { last_hours } => assert_eq!(last_hours, 24),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_verbose_is_global() {
        let cli = Cli::try_parse_from(["deedpull", "report", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let result = Cli::try_parse_from(["deedpull", "--help"]);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::DisplayHelp
        );
    }
}
