//! Control tables and the step store
//!
//! Three externally-owned tables drive a run:
//!
//! - **global variables**: named indirections such as `inbound-bucket -> s3://raw`
//! - **jobs**: one record per job, holding the JSON job arguments
//! - **steps**: one record per `<job>-<index>`, holding the table to ingest and
//!   the last checkpoint
//!
//! [`ControlTables`] is the raw record access. [`StepStore`] adds the step
//! discovery contract on top: a step is [`StepLookup::Missing`],
//! [`StepLookup::Inactive`] or [`StepLookup::Active`], and callers must treat
//! the first as "stop" and the second as "skip".

use async_trait::async_trait;
use edh_common::{EdhError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

pub mod dynamo;
pub mod memory;

pub use dynamo::DynamoControlTables;
pub use memory::{ControlSnapshot, MemoryControlTables};

/// Named indirection owned by the platform configuration store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalVariable {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlJob {
    pub name: String,
    pub active: bool,
    /// JSON-encoded job arguments
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlStep {
    pub name: String,
    pub active: bool,
    /// JSON-encoded step arguments
    pub arguments: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_load: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_load_dttm_utc: Option<String>,
}

/// Body of `last_successful_load`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastSuccessfulLoad {
    pub processed_files: Vec<String>,
}

/// The two fields a completed step writes back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub last_successful_load: LastSuccessfulLoad,
    /// `yyyymmddHHMMSS`, UTC
    pub last_load_dttm_utc: String,
}

impl Checkpoint {
    pub fn new(processed_files: Vec<String>, last_load_dttm_utc: impl Into<String>) -> Self {
        Self {
            last_successful_load: LastSuccessfulLoad { processed_files },
            last_load_dttm_utc: last_load_dttm_utc.into(),
        }
    }

    /// JSON text stored in the `last_successful_load` attribute.
    pub fn encoded_load(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.last_successful_load)?)
    }
}

/// Outcome of looking up a step record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepLookup {
    /// No record: open-ended discovery stops here.
    Missing,
    /// Record present but switched off: skip, keep probing.
    Inactive,
    Active(ControlStep),
}

/// Raw record access to the three control tables.
#[async_trait]
pub trait ControlTables: Send + Sync {
    async fn global_variable(&self, name: &str) -> Result<Option<GlobalVariable>>;

    async fn job(&self, name: &str) -> Result<Option<ControlJob>>;

    async fn step(&self, name: &str) -> Result<Option<ControlStep>>;

    /// Set exactly `last_successful_load` and `last_load_dttm_utc` on `step_name`.
    async fn write_checkpoint(&self, step_name: &str, checkpoint: &Checkpoint) -> Result<()>;
}

/// Step discovery and checkpoint contract over [`ControlTables`].
#[derive(Clone)]
pub struct StepStore {
    tables: Arc<dyn ControlTables>,
}

impl StepStore {
    pub fn new(tables: Arc<dyn ControlTables>) -> Self {
        Self { tables }
    }

    pub async fn get_step(&self, step_name: &str) -> Result<StepLookup> {
        match self.tables.step(step_name).await? {
            None => {
                warn!(step = %step_name, "Step doesn't exist");
                Ok(StepLookup::Missing)
            },
            Some(record) if !record.active => {
                warn!(step = %step_name, "Control step record is inactive");
                Ok(StepLookup::Inactive)
            },
            Some(record) => Ok(StepLookup::Active(record)),
        }
    }

    pub async fn update_checkpoint(
        &self,
        step_name: &str,
        processed_files: Vec<String>,
        timestamp: &str,
    ) -> Result<Checkpoint> {
        let checkpoint = Checkpoint::new(processed_files, timestamp);
        self.tables.write_checkpoint(step_name, &checkpoint).await?;

        info!(
            step = %step_name,
            files = checkpoint.last_successful_load.processed_files.len(),
            last_load_dttm_utc = %checkpoint.last_load_dttm_utc,
            "Step checkpoint written"
        );
        Ok(checkpoint)
    }

    pub async fn get_job(&self, job_name: &str) -> Result<Option<ControlJob>> {
        self.tables.job(job_name).await
    }

    /// Resolve a global variable, failing when it does not exist.
    pub async fn get_global_variable(&self, name: &str) -> Result<GlobalVariable> {
        self.tables
            .global_variable(name)
            .await?
            .ok_or_else(|| EdhError::config(format!("Global variable '{}' not found", name)))
    }
}
