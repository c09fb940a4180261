//! Record loading
//!
//! Turns each file of a [`LoadBatch`] into an enriched [`Table`], or into a
//! classification when it cannot be read:
//!
//! | failure | outcome |
//! |---|---|
//! | truncated DBF, unparseable CSV, too few filename tokens | rejected (retry later) |
//! | self-contradictory DBF header | corrupt (never retried) |
//!
//! Classifications are values, not errors. Only object-store failures stop a
//! batch.

pub mod csv;
pub mod dbf;

use edh_common::uri::S3Uri;
use edh_common::Result;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::batcher::LoadBatch;
use crate::config::{FileType, RunConfig, StepConfig};
use crate::enrich::enrich_table;
use crate::storage::ObjectStore;
use crate::table::Table;

/// Why a file produced no table.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadFailure {
    /// Recoverable, typically a partial upload.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Structurally broken; retrying will not help.
    #[error("corrupt: {0}")]
    Corrupt(String),
}

/// Loader output for one batch
#[derive(Debug, Default)]
pub struct BatchLoad {
    pub tables: Vec<Table>,
    pub rejected: Vec<S3Uri>,
    pub corrupt: Vec<S3Uri>,
    /// Files of an unsupported type. They produce no rows but are still
    /// treated as processed.
    pub skipped: Vec<S3Uri>,
}

impl BatchLoad {
    pub fn rows(&self) -> usize {
        self.tables.iter().map(Table::num_rows).sum()
    }
}

pub struct RecordLoader {
    store: Arc<dyn ObjectStore>,
    config: Arc<RunConfig>,
}

impl RecordLoader {
    pub fn new(store: Arc<dyn ObjectStore>, config: Arc<RunConfig>) -> Self {
        Self { store, config }
    }

    /// Decode and enrich one file. `Ok(None)` for unsupported file types.
    pub async fn load_file(
        &self,
        step: &StepConfig,
        uri: &S3Uri,
    ) -> Result<std::result::Result<Option<Table>, LoadFailure>> {
        let decode: fn(&[u8]) -> std::result::Result<Table, LoadFailure> = match step.file_type {
            FileType::Csv => csv::read_csv,
            FileType::Dbf => |data| dbf::read_dbf(data).map_err(LoadFailure::from),
            FileType::Other(_) => return Ok(Ok(None)),
        };

        let body = self.store.get(&uri.bucket, &uri.key).await?;
        let mut table = match decode(&body) {
            Ok(table) => table,
            Err(failure) => return Ok(Err(failure)),
        };

        if let Err(e) = enrich_table(
            &mut table,
            uri.file_name(),
            &self.config.edh_columns,
            &self.config.replace_rules,
        ) {
            return Ok(Err(LoadFailure::Rejected(e.to_string())));
        }

        debug!(file = %uri, rows = table.num_rows(), columns = table.num_columns(), "File loaded");
        Ok(Ok(Some(table)))
    }

    pub async fn load_batch(&self, step: &StepConfig, batch: &LoadBatch) -> Result<BatchLoad> {
        let mut load = BatchLoad::default();

        for uri in &batch.files {
            match self.load_file(step, uri).await? {
                Ok(Some(table)) => load.tables.push(table),
                Ok(None) => {
                    info!(step = %step.step_name, file = %uri, file_type = %step.file_type, "[EMPTY] Unsupported file type, nothing loaded");
                    load.skipped.push(uri.clone());
                },
                Err(LoadFailure::Rejected(reason)) => {
                    warn!(step = %step.step_name, file = %uri, reason = %reason, "Rejected (recoverable) file");
                    load.rejected.push(uri.clone());
                },
                Err(LoadFailure::Corrupt(reason)) => {
                    warn!(step = %step.step_name, file = %uri, reason = %reason, "Corrupt (non-recoverable) file");
                    load.corrupt.push(uri.clone());
                },
            }
        }

        Ok(load)
    }
}
