//! End-to-end smoke tests for the `deedpull` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Binary command with its store and directories rooted in a temp dir.
fn deedpull(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("deedpull").expect("binary builds");
    cmd.current_dir(dir.path())
        .env("DB_PATH", dir.path().join("index.db"))
        .env("ARCHIVE_DIR", dir.path().join("archive"))
        .env("TEMP_DOWNLOAD_DIR", dir.path().join("scratch"))
        .env("CHECKPOINT_DIR", dir.path().join("checkpoints"))
        .env("RUST_LOG", "error");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    deedpull(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("clean"))
        .stdout(predicate::str::contains("parse-related"))
        .stdout(predicate::str::contains("download"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn test_missing_subcommand_errors() {
    let dir = TempDir::new().unwrap();
    deedpull(&dir).assert().failure();
}

#[test]
fn test_unknown_stage_is_rejected() {
    let dir = TempDir::new().unwrap();
    deedpull(&dir)
        .args(["download", "--stage", "everything"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown stage"));
}

#[test]
fn test_report_on_fresh_store_succeeds() {
    let dir = TempDir::new().unwrap();
    deedpull(&dir)
        .arg("report")
        .assert()
        .success()
        .stdout(predicate::str::contains("Pipeline status"));
}

#[test]
fn test_clean_dry_run_on_fresh_store() {
    let dir = TempDir::new().unwrap();
    deedpull(&dir)
        .args(["clean", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dry run"));
}

#[test]
fn test_parse_related_stats_only() {
    let dir = TempDir::new().unwrap();
    deedpull(&dir)
        .args(["parse-related", "--stats-only"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Related-items coverage"));
}

#[test]
fn test_download_dry_run_reports_plan() {
    let dir = TempDir::new().unwrap();
    deedpull(&dir)
        .args(["download", "--stage", "test", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dry run"))
        .stdout(predicate::str::contains("would process"));
}

#[test]
fn test_monitor_prints_status_counts() {
    let dir = TempDir::new().unwrap();
    deedpull(&dir).arg("monitor").assert().success();
}

#[test]
fn test_validate_window_flag() {
    let dir = TempDir::new().unwrap();
    deedpull(&dir)
        .args(["validate", "--last-hours", "8"])
        .assert()
        .success()
        .stdout(predicate::str::contains("last 8h"));
}
