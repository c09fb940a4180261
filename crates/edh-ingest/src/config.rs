//! Job and step configuration
//!
//! A job record's `arguments` field holds JSON such as:
//!
//! ```json
//! {
//!   "s3_inbound_bucket": {"global_var_name": "inbound-bucket"},
//!   "s3_data_lake_bucket": {"global_var_name": "lake-bucket"},
//!   "s3_inbound_key": "inbound/",
//!   "s3_data_lake_key": "lake/",
//!   "s3_inbound_processed_key": "processed/",
//!   "database_name": "edh_raw",
//!   "file_name_2_columns": {"region": {"file_order": 0, "lake_order": 1}},
//!   "replace_chars": {"?": "", " ": "_"},
//!   "start_step": 1,
//!   "end_step": -1
//! }
//! ```
//!
//! [`ConfigResolver`] turns that record plus the global variables it points at
//! into an immutable [`RunConfig`].

use edh_common::uri::{join_key, strip_scheme};
use edh_common::{EdhError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::{info, warn};

use crate::control::{ControlStep, LastSuccessfulLoad, StepStore};
use crate::enrich::{EdhColumn, ReplaceRule};

// ============================================================================
// Defaults
// ============================================================================

/// Default batch size threshold in megabytes (10^6 bytes).
pub const DEFAULT_THRESHOLD_MB: f64 = 80.0;

/// Default batch file-count threshold.
pub const DEFAULT_THRESHOLD_FILE_COUNT: i64 = 500;

/// Default prefix for rejected (recoverable) files.
pub const DEFAULT_REJECTED_KEY: &str = "rejected/unknown/";

/// Default prefix for corrupt (non-recoverable) files.
pub const DEFAULT_CORRUPTED_KEY: &str = "corrupt/unknown/";

/// Job name left behind by the deployment template. Never a real job.
pub const PLACEHOLDER_JOB_NAME: &str = "update-default";

/// `end_step` value meaning "keep going until a step is missing".
pub const OPEN_ENDED: i64 = -1;

const BYTES_PER_MB: f64 = 1_000_000.0;

// ============================================================================
// Raw job arguments
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalVarRef {
    pub global_var_name: String,
}

/// Job arguments exactly as stored in the control table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobArguments {
    pub s3_inbound_bucket: GlobalVarRef,
    pub s3_data_lake_bucket: GlobalVarRef,
    pub s3_inbound_key: String,
    pub s3_data_lake_key: String,
    pub s3_inbound_processed_key: String,
    #[serde(default = "default_rejected_key")]
    pub s3_inbound_rejected_key: String,
    #[serde(default = "default_corrupted_key")]
    pub s3_corrupted_bucket_key: String,
    pub database_name: String,
    /// `{column: {file_order, lake_order}}`, in configured order
    pub file_name_2_columns: Map<String, Value>,
    /// `{pattern: replacement}`, applied in configured order
    pub replace_chars: Map<String, Value>,
    pub start_step: i64,
    pub end_step: i64,
    #[serde(default = "default_threshold_mb")]
    pub threshold_mb: f64,
    #[serde(default = "default_threshold_file_count")]
    pub threshold_file_count: i64,
}

fn default_rejected_key() -> String {
    DEFAULT_REJECTED_KEY.to_string()
}

fn default_corrupted_key() -> String {
    DEFAULT_CORRUPTED_KEY.to_string()
}

fn default_threshold_mb() -> f64 {
    DEFAULT_THRESHOLD_MB
}

fn default_threshold_file_count() -> i64 {
    DEFAULT_THRESHOLD_FILE_COUNT
}

#[derive(Debug, Deserialize)]
struct ColumnOrdering {
    file_order: usize,
    lake_order: i64,
}

impl JobArguments {
    pub fn parse(job_name: &str, raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| {
            EdhError::config(format!("Invalid arguments for job '{}': {}", job_name, e))
        })
    }

    pub fn edh_columns(&self) -> Result<Vec<EdhColumn>> {
        self.file_name_2_columns
            .iter()
            .map(|(name, ordering)| {
                let ordering: ColumnOrdering =
                    serde_json::from_value(ordering.clone()).map_err(|e| {
                        EdhError::config(format!(
                            "file_name_2_columns entry '{}' is invalid: {}",
                            name, e
                        ))
                    })?;
                Ok(EdhColumn {
                    name: name.clone(),
                    file_order: ordering.file_order,
                    lake_order: ordering.lake_order,
                })
            })
            .collect()
    }

    pub fn replace_rules(&self) -> Result<Vec<ReplaceRule>> {
        self.replace_chars
            .iter()
            .map(|(pattern, replacement)| match replacement {
                Value::String(r) => Ok(ReplaceRule::new(pattern.as_str(), r.as_str())),
                other => Err(EdhError::config(format!(
                    "replace_chars value for '{}' must be a string, got {}",
                    pattern, other
                ))),
            })
            .collect()
    }

    pub fn thresholds(&self) -> Result<BatchThresholds> {
        if self.threshold_mb.is_nan() || self.threshold_mb <= 0.0 {
            return Err(EdhError::config(format!(
                "threshold_mb must be positive, got {}",
                self.threshold_mb
            )));
        }
        if self.threshold_file_count <= 0 {
            return Err(EdhError::config(format!(
                "threshold_file_count must be positive, got {}",
                self.threshold_file_count
            )));
        }

        Ok(BatchThresholds {
            max_bytes: (self.threshold_mb * BYTES_PER_MB) as u64,
            max_files: self.threshold_file_count as usize,
        })
    }

    pub fn step_range(&self) -> Result<StepRange> {
        if self.start_step < 0 {
            return Err(EdhError::config(format!(
                "start_step must not be negative, got {}",
                self.start_step
            )));
        }

        match self.end_step {
            OPEN_ENDED => Ok(StepRange::OpenEnded {
                start: self.start_step as u64,
            }),
            end if end >= 0 => Ok(StepRange::Bounded {
                start: self.start_step as u64,
                end: end as u64,
            }),
            end => Err(EdhError::config(format!(
                "end_step must be -1 or a step index, got {}",
                end
            ))),
        }
    }
}

// ============================================================================
// Resolved configuration
// ============================================================================

/// Batch closing limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchThresholds {
    pub max_bytes: u64,
    pub max_files: usize,
}

impl Default for BatchThresholds {
    fn default() -> Self {
        Self {
            max_bytes: (DEFAULT_THRESHOLD_MB * BYTES_PER_MB) as u64,
            max_files: DEFAULT_THRESHOLD_FILE_COUNT as usize,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepRange {
    /// `start..=end`; missing and inactive steps are skipped.
    Bounded { start: u64, end: u64 },
    /// `start..` until the first missing step; inactive steps are skipped.
    OpenEnded { start: u64 },
}

impl StepRange {
    pub fn start(&self) -> u64 {
        match self {
            StepRange::Bounded { start, .. } | StepRange::OpenEnded { start } => *start,
        }
    }
}

impl fmt::Display for StepRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepRange::Bounded { start, end } => write!(f, "{}..={}", start, end),
            StepRange::OpenEnded { start } => write!(f, "{}..", start),
        }
    }
}

/// Everything a job run needs, resolved once up front.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub job_name: String,
    pub source_bucket: String,
    pub source_prefix: String,
    pub target_bucket: String,
    pub target_prefix: String,
    pub processed_prefix: String,
    pub rejected_prefix: String,
    pub corrupted_prefix: String,
    pub database_name: String,
    pub edh_columns: Vec<EdhColumn>,
    pub replace_rules: Vec<ReplaceRule>,
    pub thresholds: BatchThresholds,
    pub steps: StepRange,
}

impl RunConfig {
    pub fn step_name(&self, index: u64) -> String {
        format!("{}-{}", self.job_name, index)
    }

    /// Inbound folder for `table`, with a trailing slash.
    pub fn inbound_prefix(&self, table: &str) -> String {
        join_key(&[&self.source_prefix, &format!("{}/", table)])
    }
}

/// Resolves a job record into a [`RunConfig`].
pub struct ConfigResolver {
    store: StepStore,
}

impl ConfigResolver {
    pub fn new(store: StepStore) -> Self {
        Self { store }
    }

    /// `Ok(None)` when the job is missing or inactive; the caller should stop
    /// quietly.
    pub async fn resolve(&self, job_name: &str) -> Result<Option<RunConfig>> {
        if job_name == PLACEHOLDER_JOB_NAME {
            return Err(EdhError::config(format!(
                "Job name '{}' is the deployment placeholder, set a real control job",
                job_name
            )));
        }

        let job = match self.store.get_job(job_name).await? {
            Some(job) => job,
            None => {
                warn!(job = %job_name, "Control job record doesn't exist");
                return Ok(None);
            },
        };
        if !job.active {
            warn!(job = %job_name, "Control job record is inactive");
            return Ok(None);
        }

        let args = JobArguments::parse(job_name, &job.arguments)?;
        let source = self
            .store
            .get_global_variable(&args.s3_inbound_bucket.global_var_name)
            .await?;
        let target = self
            .store
            .get_global_variable(&args.s3_data_lake_bucket.global_var_name)
            .await?;

        let config = RunConfig {
            job_name: job_name.to_string(),
            source_bucket: strip_scheme(&source.value).to_string(),
            source_prefix: args.s3_inbound_key.clone(),
            target_bucket: strip_scheme(&target.value).to_string(),
            target_prefix: args.s3_data_lake_key.clone(),
            processed_prefix: args.s3_inbound_processed_key.clone(),
            rejected_prefix: args.s3_inbound_rejected_key.clone(),
            corrupted_prefix: args.s3_corrupted_bucket_key.clone(),
            database_name: args.database_name.clone(),
            edh_columns: args.edh_columns()?,
            replace_rules: args.replace_rules()?,
            thresholds: args.thresholds()?,
            steps: args.step_range()?,
        };

        if config.source_bucket.is_empty() || config.target_bucket.is_empty() {
            return Err(EdhError::config(format!(
                "Job '{}' resolves to an empty bucket name",
                job_name
            )));
        }

        info!(
            job = %job_name,
            source = %format!("s3://{}/{}", config.source_bucket, config.source_prefix),
            target = %format!("s3://{}/{}", config.target_bucket, config.target_prefix),
            steps = %config.steps,
            "Job configuration resolved"
        );
        Ok(Some(config))
    }
}

// ============================================================================
// Step configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileType {
    Csv,
    Dbf,
    Other(String),
}

impl From<&str> for FileType {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "csv" => FileType::Csv,
            "dbf" => FileType::Dbf,
            _ => FileType::Other(value.to_string()),
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileType::Csv => write!(f, "csv"),
            FileType::Dbf => write!(f, "dbf"),
            FileType::Other(other) => write!(f, "{}", other),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StepArguments {
    name: String,
    file_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepConfig {
    pub step_name: String,
    pub table_name: String,
    pub file_type: FileType,
    pub last_successful_load: Option<LastSuccessfulLoad>,
}

impl StepConfig {
    pub fn from_record(record: &ControlStep) -> Result<Self> {
        let args: StepArguments = serde_json::from_str(&record.arguments).map_err(|e| {
            EdhError::config(format!("Invalid arguments for step '{}': {}", record.name, e))
        })?;
        if args.name.trim().is_empty() {
            return Err(EdhError::config(format!(
                "Step '{}' has an empty table name",
                record.name
            )));
        }

        let last_successful_load = record.last_successful_load.as_deref().and_then(|raw| {
            serde_json::from_str::<LastSuccessfulLoad>(raw)
                .map_err(|e| {
                    warn!(step = %record.name, error = %e, "Ignoring unreadable previous checkpoint");
                })
                .ok()
        });

        Ok(Self {
            step_name: record.name.clone(),
            table_name: args.name,
            file_type: FileType::from(args.file_type.as_str()),
            last_successful_load,
        })
    }
}
