//! Job and step execution
//!
//! ```text
//! RESOLVING_CONFIG
//!   -> for each step index
//!        DISCOVER_STEP -> SKIP | LOAD_AND_RUN -> CHECKPOINT
//!   -> DONE
//! ```
//!
//! Steps are named `<job>-<index>`. With a bounded range every index is
//! probed and missing or inactive steps are skipped. With an open-ended range
//! inactive steps are skipped and the first missing step ends the job.
//!
//! Inside a step the batches run one after another: load, write, then move
//! rejected, corrupt and finally the remaining files out of the inbound
//! folder. The step checkpoint is written once, after the last batch.

use chrono::{DateTime, Utc};
use edh_common::uri::S3Uri;
use edh_common::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::batcher::{LoadBatch, PartitionBatcher};
use crate::catalog::TableCatalog;
use crate::config::{ConfigResolver, RunConfig, StepConfig, StepRange};
use crate::control::{Checkpoint, ControlStep, ControlTables, StepLookup, StepStore};
use crate::loader::{BatchLoad, RecordLoader};
use crate::relocator::{FileRelocator, Outcome};
use crate::storage::ObjectStore;
use crate::writer::LakeWriter;

/// `yyyymmddHHMMSS`, the format of processing and checkpoint timestamps.
pub const DTTM_FORMAT: &str = "%Y%m%d%H%M%S";

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub processed_dttm: String,
    pub files: usize,
    pub rows: usize,
    pub processed: Vec<String>,
    pub rejected: Vec<String>,
    pub corrupt: Vec<String>,
    /// Partition folder written, if the batch had rows
    pub partition_location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Completed,
    /// No inbound files; nothing written, no checkpoint.
    Empty,
    Inactive,
    /// Only reported in bounded mode; open-ended mode stops instead.
    Missing,
    /// Step arguments could not be used.
    Misconfigured(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step_name: String,
    pub status: StepStatus,
    pub batches: Vec<BatchReport>,
    pub checkpoint: Option<Checkpoint>,
}

impl StepReport {
    fn without_batches(step_name: String, status: StepStatus) -> Self {
        Self {
            step_name,
            status,
            batches: Vec::new(),
            checkpoint: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub job_name: String,
    pub steps: Vec<StepReport>,
}

impl JobReport {
    pub fn count(&self, status: &StepStatus) -> usize {
        self.steps.iter().filter(|s| &s.status == status).count()
    }

    pub fn files_moved(&self, outcome: Outcome) -> usize {
        self.steps
            .iter()
            .flat_map(|s| &s.batches)
            .map(|b| match outcome {
                Outcome::Processed => b.processed.len(),
                Outcome::Rejected => b.rejected.len(),
                Outcome::Corrupt => b.corrupt.len(),
            })
            .sum()
    }
}

/// How a job invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Job record missing or inactive.
    NotRunnable,
    Completed(JobReport),
}

// ============================================================================
// Processing clock
// ============================================================================

/// Hands out processing timestamps that never repeat, so two batches of a
/// step can never share a partition folder.
#[derive(Debug, Default)]
pub struct ProcessingClock {
    last: Option<String>,
}

impl ProcessingClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn next_stamp(&mut self) -> (DateTime<Utc>, String) {
        loop {
            let now = Utc::now();
            let stamp = now.format(DTTM_FORMAT).to_string();
            if self.last.as_deref() != Some(stamp.as_str()) {
                self.last = Some(stamp.clone());
                return (now, stamp);
            }

            let into_second = u64::from(now.timestamp_subsec_millis()).min(999);
            tokio::time::sleep(Duration::from_millis(1000 - into_second)).await;
        }
    }
}

// ============================================================================
// Step executor
// ============================================================================

pub struct StepExecutor {
    steps: StepStore,
    config: Arc<RunConfig>,
    batcher: PartitionBatcher,
    loader: RecordLoader,
    writer: LakeWriter,
    relocator: FileRelocator,
}

impl StepExecutor {
    pub fn new(
        steps: StepStore,
        config: Arc<RunConfig>,
        store: Arc<dyn ObjectStore>,
        catalog: Option<Arc<dyn TableCatalog>>,
    ) -> Self {
        Self {
            batcher: PartitionBatcher::new(store.clone(), config.clone()),
            loader: RecordLoader::new(store.clone(), config.clone()),
            writer: LakeWriter::new(store.clone(), catalog, config.clone()),
            relocator: FileRelocator::new(store, config.clone()),
            steps,
            config,
        }
    }

    pub async fn run(&self) -> Result<JobReport> {
        let mut report = JobReport {
            job_name: self.config.job_name.clone(),
            steps: Vec::new(),
        };

        match self.config.steps {
            StepRange::Bounded { start, end } => {
                for index in start..=end {
                    let step_name = self.config.step_name(index);
                    let step = match self.steps.get_step(&step_name).await? {
                        StepLookup::Missing => {
                            StepReport::without_batches(step_name, StepStatus::Missing)
                        },
                        StepLookup::Inactive => {
                            StepReport::without_batches(step_name, StepStatus::Inactive)
                        },
                        StepLookup::Active(record) => self.run_step(&record).await?,
                    };
                    report.steps.push(step);
                }
            },
            StepRange::OpenEnded { start } => {
                let mut index = start;
                loop {
                    let step_name = self.config.step_name(index);
                    let step = match self.steps.get_step(&step_name).await? {
                        StepLookup::Missing => break,
                        StepLookup::Inactive => {
                            StepReport::without_batches(step_name, StepStatus::Inactive)
                        },
                        StepLookup::Active(record) => self.run_step(&record).await?,
                    };
                    report.steps.push(step);
                    index += 1;
                }
            },
        }

        info!(
            job = %report.job_name,
            steps = report.steps.len(),
            completed = report.count(&StepStatus::Completed),
            empty = report.count(&StepStatus::Empty),
            processed = report.files_moved(Outcome::Processed),
            rejected = report.files_moved(Outcome::Rejected),
            corrupt = report.files_moved(Outcome::Corrupt),
            "[JOB] Completed"
        );
        Ok(report)
    }

    pub async fn run_step(&self, record: &ControlStep) -> Result<StepReport> {
        let step = match StepConfig::from_record(record) {
            Ok(step) => step,
            Err(e) if e.is_configuration() => {
                warn!(step = %record.name, error = %e, "Skipping step with unusable arguments");
                return Ok(StepReport::without_batches(
                    record.name.clone(),
                    StepStatus::Misconfigured(e.to_string()),
                ));
            },
            Err(e) => return Err(e),
        };

        info!(
            step = %step.step_name,
            table = %step.table_name,
            file_type = %step.file_type,
            previous_files = step
                .last_successful_load
                .as_ref()
                .map(|l| l.processed_files.len())
                .unwrap_or(0),
            "[STEP] Starting"
        );

        let batches = self.batcher.batches(&step.table_name).await?;
        if batches.is_empty() {
            info!(
                step = %step.step_name,
                inbound = %format!("s3://{}/{}", self.config.source_bucket, self.config.inbound_prefix(&step.table_name)),
                "[STEP][EMPTY] No inbound files"
            );
            return Ok(StepReport::without_batches(step.step_name, StepStatus::Empty));
        }

        let mut clock = ProcessingClock::new();
        let mut reports = Vec::with_capacity(batches.len());
        for (i, batch) in batches.iter().enumerate() {
            let (now, processed_dttm) = clock.next_stamp().await;
            info!(
                step = %step.step_name,
                batch = i + 1,
                of = batches.len(),
                files = batch.len(),
                threshold_bytes = self.config.thresholds.max_bytes,
                threshold_files = self.config.thresholds.max_files,
                edh_processed_dttm_utc = %processed_dttm,
                "[STEP] Processing batch"
            );
            reports.push(self.run_batch(&step, batch, now, processed_dttm).await?);
        }

        // Only the last batch is recorded.
        let checkpoint_files: Vec<String> = reports
            .last()
            .map(|b| {
                b.processed
                    .iter()
                    .chain(&b.rejected)
                    .chain(&b.corrupt)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let stamp = Utc::now().format(DTTM_FORMAT).to_string();
        let checkpoint = self
            .steps
            .update_checkpoint(&step.step_name, checkpoint_files, &stamp)
            .await?;

        info!(step = %step.step_name, batches = reports.len(), "[STEP][COMPLETED]");
        Ok(StepReport {
            step_name: step.step_name,
            status: StepStatus::Completed,
            batches: reports,
            checkpoint: Some(checkpoint),
        })
    }

    async fn run_batch(
        &self,
        step: &StepConfig,
        batch: &LoadBatch,
        now: DateTime<Utc>,
        processed_dttm: String,
    ) -> Result<BatchReport> {
        let BatchLoad {
            tables,
            rejected,
            corrupt,
            ..
        } = self.loader.load_batch(step, batch).await?;
        let rows = tables.iter().map(|t| t.num_rows()).sum();

        let written = self
            .writer
            .write_batch(&step.table_name, tables, &processed_dttm)
            .await?;
        if written.is_none() {
            info!(step = %step.step_name, table = %step.table_name, "[STEP][EMPTY] Batch produced no rows");
        }

        let table = &step.table_name;
        let rejected_names = self
            .relocator
            .relocate(table, &rejected, Outcome::Rejected, now)
            .await?;
        let corrupt_names = self
            .relocator
            .relocate(table, &corrupt, Outcome::Corrupt, now)
            .await?;

        let remainder: Vec<S3Uri> = batch
            .files
            .iter()
            .filter(|f| !rejected.contains(f) && !corrupt.contains(f))
            .cloned()
            .collect();
        let processed_names = self
            .relocator
            .relocate(table, &remainder, Outcome::Processed, now)
            .await?;

        Ok(BatchReport {
            processed_dttm,
            files: batch.len(),
            rows,
            processed: processed_names,
            rejected: rejected_names,
            corrupt: corrupt_names,
            partition_location: written.map(|w| w.partition_location),
        })
    }
}

/// Resolve `job_name` and run it.
///
/// A job-level configuration problem comes back as an `Err` for which
/// [`edh_common::EdhError::is_configuration`] holds; callers treat it as a
/// clean stop.
pub async fn run_job(
    job_name: &str,
    tables: Arc<dyn ControlTables>,
    store: Arc<dyn ObjectStore>,
    catalog: Option<Arc<dyn TableCatalog>>,
) -> Result<JobOutcome> {
    let steps = StepStore::new(tables);
    let config = match ConfigResolver::new(steps.clone()).resolve(job_name).await? {
        Some(config) => Arc::new(config),
        None => return Ok(JobOutcome::NotRunnable),
    };

    let report = StepExecutor::new(steps, config, store, catalog).run().await?;
    Ok(JobOutcome::Completed(report))
}
