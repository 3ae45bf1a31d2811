//! Deedpull Core Library
//!
//! Core functionality for the county land-records acquisition pipeline:
//! a durable document index doubling as a work queue, portal routing and
//! HTTP clients, PDF optimization, content-addressed archiving, and the
//! staged scheduler that drives hundreds of thousands of records through
//! download → validate → optimize → archive exactly once.
//!
//! # Architecture
//!
//! - [`db`] - index-store connection and schema management
//! - [`index`] - row types, status machine, document-type taxonomy
//! - [`queue`] - batch fetching, CAS claims, transitions, cleaning pass
//! - [`portal`] - book-range routing and the courthouse HTTP clients
//! - [`optimize`] - Ghostscript PDF optimization with soft fallback
//! - [`archive`] - object-archive contract and filesystem implementation
//! - [`worker`] - the per-record pipeline with its error policy table
//! - [`scheduler`] - bounded fan-out, checkpoints, shutdown
//! - [`related`] - offline cross-reference enrichment

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod archive;
pub mod config;
pub mod db;
pub mod index;
pub mod optimize;
pub mod portal;
pub mod queue;
pub mod rate_limit;
pub mod related;
pub mod scheduler;
pub mod worker;

// Re-export commonly used types
pub use config::Settings;
pub use db::Database;
pub use index::{DownloadStatus, IndexDocument, RecordSource};
pub use portal::{route_book, Portal};
pub use queue::{Queue, QueueError, Stage};
pub use rate_limit::RateLimiter;
pub use scheduler::{PipelineStats, Scheduler, SchedulerConfig, StatsSnapshot};
pub use worker::{process_record, WorkerContext};
