//! Moving inbound files out of the way
//!
//! Once a batch is done each of its files is copied to the outcome folder in
//! the source bucket and deleted from the inbound folder:
//!
//! ```text
//! <outcome_prefix>/<table>/<YYYY>/<MM>/<DD>/<filename>
//! ```
//!
//! Copy then delete is two calls. A crash between them leaves the file in
//! both places and the next run ingests it again.

use chrono::{DateTime, Utc};
use edh_common::uri::{join_key, S3Uri};
use edh_common::Result;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::config::RunConfig;
use crate::storage::ObjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Processed,
    Rejected,
    Corrupt,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Outcome::Processed => "PROCESSED",
            Outcome::Rejected => "REJECTED",
            Outcome::Corrupt => "CORRUPT",
        };
        f.write_str(label)
    }
}

pub struct FileRelocator {
    store: Arc<dyn ObjectStore>,
    config: Arc<RunConfig>,
}

impl FileRelocator {
    pub fn new(store: Arc<dyn ObjectStore>, config: Arc<RunConfig>) -> Self {
        Self { store, config }
    }

    fn outcome_prefix(&self, outcome: Outcome) -> &str {
        match outcome {
            Outcome::Processed => &self.config.processed_prefix,
            Outcome::Rejected => &self.config.rejected_prefix,
            Outcome::Corrupt => &self.config.corrupted_prefix,
        }
    }

    /// Where `file_name` ends up for `outcome` on `now`'s date.
    pub fn destination(
        &self,
        table: &str,
        file_name: &str,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> S3Uri {
        let date = now.format("%Y/%m/%d").to_string();
        S3Uri::new(
            &self.config.source_bucket,
            join_key(&[self.outcome_prefix(outcome), table, &date, file_name]),
        )
    }

    /// Move `files` from where they were listed and return their bare
    /// filenames in input order. Subfolders under the inbound table folder
    /// are flattened into the dated outcome folder.
    pub async fn relocate(
        &self,
        table: &str,
        files: &[S3Uri],
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let mut moved = Vec::with_capacity(files.len());

        for file in files {
            let file_name = file.file_name();
            let destination = self.destination(table, file_name, outcome, now);

            self.store.copy(file, &destination).await?;
            self.store.delete(&file.bucket, &file.key).await?;

            info!(outcome = %outcome, from = %file, to = %destination, "File relocated");
            moved.push(file_name.to_string());
        }

        Ok(moved)
    }
}
