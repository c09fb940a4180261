//! EDH inbound ingestion engine
//!
//! Moves flat files (CSV, DBF) from an inbound object-store area into a
//! partitioned Parquet data lake, driven by three control tables.
//!
//! # Pipeline
//!
//! - [`config`]: job record + global variables -> [`config::RunConfig`]
//! - [`batcher`]: inbound listing -> timestamp partitions -> threshold batches
//! - [`loader`]: file bytes -> enriched [`table::Table`], or a rejected/corrupt
//!   classification
//! - [`writer`] / [`catalog`]: Parquet upload and partition registration
//! - [`relocator`]: inbound -> processed/rejected/corrupt folders
//! - [`executor`]: step discovery, batch sequencing, checkpoints
//!
//! # Example
//!
//! ```no_run
//! use edh_ingest::control::MemoryControlTables;
//! use edh_ingest::executor::{run_job, JobOutcome};
//! use edh_ingest::storage::MemoryObjectStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let tables = MemoryControlTables::from_json_file("control.json".as_ref())?;
//!     let store = MemoryObjectStore::new();
//!
//!     if let JobOutcome::Completed(report) =
//!         run_job("jobA", Arc::new(tables), Arc::new(store), None).await?
//!     {
//!         println!("{} steps", report.steps.len());
//!     }
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod batcher;
pub mod catalog;
pub mod config;
pub mod control;
pub mod enrich;
pub mod executor;
pub mod loader;
pub mod relocator;
pub mod settings;
pub mod storage;
pub mod table;
pub mod writer;

pub use executor::{run_job, JobOutcome, JobReport};
