//! EDH Ingest - inbound file ingestion job

use anyhow::{Context, Result};
use clap::Parser;
use edh_common::logging::{init_logging, LogConfig, LogLevel};
use edh_ingest::catalog::{GlueCatalog, TableCatalog};
use edh_ingest::control::{ControlTables, DynamoControlTables, MemoryControlTables};
use edh_ingest::executor::{run_job, JobOutcome};
use edh_ingest::relocator::Outcome;
use edh_ingest::settings::{ControlTableNames, EngineSettings};
use edh_ingest::storage::S3ObjectStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "edh-ingest")]
#[command(author, version, about = "Ingest inbound CSV/DBF files into the EDH data lake")]
struct Cli {
    /// Control job to run
    #[arg(long, env = "CONTROL_JOB")]
    control_job: String,

    /// Global variables table
    #[arg(long, env = "GLOBAL_VARIABLES_TABLE", required_unless_present = "local_control")]
    global_variables_table: Option<String>,

    /// Control job table
    #[arg(long, env = "CONTROL_JOB_TABLE", required_unless_present = "local_control")]
    control_job_table: Option<String>,

    /// Control job step table
    #[arg(long, env = "CONTROL_JOB_STEP_TABLE", required_unless_present = "local_control")]
    control_job_step_table: Option<String>,

    /// Read control tables from a JSON snapshot instead of DynamoDB. Updated
    /// checkpoints are written back to the same file.
    #[arg(long, value_name = "FILE")]
    local_control: Option<PathBuf>,

    /// Do not register partitions in the Glue catalog
    #[arg(long)]
    skip_catalog: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn table_names(&self) -> Option<ControlTableNames> {
        Some(ControlTableNames {
            global_variables: self.global_variables_table.clone()?,
            jobs: self.control_job_table.clone()?,
            steps: self.control_job_step_table.clone()?,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("edh-ingest")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    let settings = EngineSettings::from_env();
    let sdk_config = settings.sdk_config().await;

    let mut local_tables = None;
    let tables: Arc<dyn ControlTables> = match &cli.local_control {
        Some(path) => {
            let memory = Arc::new(
                MemoryControlTables::from_json_file(path)
                    .with_context(|| format!("Failed to load control snapshot {}", path.display()))?,
            );
            info!(snapshot = %path.display(), "Using local control tables");
            local_tables = Some(memory.clone());
            memory
        },
        None => {
            let names = cli
                .table_names()
                .context("All three control table names are required")?;
            Arc::new(DynamoControlTables::new(&sdk_config, &settings, names))
        },
    };

    let store = Arc::new(S3ObjectStore::new(&sdk_config, &settings));
    let catalog: Option<Arc<dyn TableCatalog>> = if cli.skip_catalog {
        warn!("Catalog registration disabled");
        None
    } else {
        Some(Arc::new(GlueCatalog::new(&sdk_config, &settings)))
    };

    info!(job = %cli.control_job, "[JOB] Starting");
    let outcome = run_job(&cli.control_job, tables, store, catalog).await;

    if let (Some(memory), Some(path)) = (&local_tables, &cli.local_control) {
        let snapshot = serde_json::to_string_pretty(&memory.snapshot())?;
        std::fs::write(path, snapshot)
            .with_context(|| format!("Failed to write control snapshot {}", path.display()))?;
    }

    match outcome {
        Ok(JobOutcome::Completed(report)) => {
            for step in &report.steps {
                info!(
                    step = %step.step_name,
                    status = ?step.status,
                    batches = step.batches.len(),
                    "Step summary"
                );
            }
            info!(
                job = %report.job_name,
                processed = report.files_moved(Outcome::Processed),
                rejected = report.files_moved(Outcome::Rejected),
                corrupt = report.files_moved(Outcome::Corrupt),
                "Ingestion complete"
            );
        },
        Ok(JobOutcome::NotRunnable) => {
            warn!(job = %cli.control_job, "[JOB] Nothing to run");
        },
        Err(e) if e.is_configuration() => {
            warn!(job = %cli.control_job, error = %e, "[JOB] Stopped on configuration");
        },
        Err(e) => {
            error!(job = %cli.control_job, error = %e, "[JOB] Failed");
            return Err(e).context(format!("Job '{}' failed", cli.control_job));
        },
    }

    Ok(())
}
