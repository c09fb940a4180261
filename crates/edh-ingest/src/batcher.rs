//! Threshold batching of inbound files
//!
//! Inbound filenames end in a timestamp token (`US_20240101.csv`). Files that
//! share a timestamp form an [`InboundPartition`] and are never split across
//! batches. Partitions are packed greedily, oldest first, into [`LoadBatch`]es
//! bounded by a byte and a file-count threshold.

use edh_common::uri::{file_name, S3Uri};
use edh_common::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{BatchThresholds, RunConfig};
use crate::enrich::file_stem;
use crate::storage::{ObjectStore, ObjectSummary};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFileRef {
    pub key: String,
    pub size: u64,
    pub inbound_timestamp: String,
}

/// Files sharing one inbound timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPartition {
    pub timestamp: String,
    pub files: Vec<SourceFileRef>,
}

impl InboundPartition {
    pub fn size_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// Files loaded and written together under one processing timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadBatch {
    pub files: Vec<S3Uri>,
}

impl LoadBatch {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Last `_`-separated token of the filename stem.
pub fn inbound_timestamp(key: &str) -> String {
    let stem = file_stem(file_name(key));
    stem.rsplit('_').next().unwrap_or(stem).to_string()
}

/// Group files by inbound timestamp, oldest first. Files keep their relative
/// order inside a partition.
pub fn group_partitions(objects: &[ObjectSummary]) -> Vec<InboundPartition> {
    let mut grouped: BTreeMap<String, Vec<SourceFileRef>> = BTreeMap::new();
    for object in objects.iter().filter(|o| !o.is_folder_marker()) {
        let timestamp = inbound_timestamp(&object.key);
        grouped
            .entry(timestamp.clone())
            .or_default()
            .push(SourceFileRef {
                key: object.key.clone(),
                size: object.size,
                inbound_timestamp: timestamp,
            });
    }

    grouped
        .into_iter()
        .map(|(timestamp, files)| InboundPartition { timestamp, files })
        .collect()
}

/// Greedy packing. Before a partition is added, the open batch is closed if
/// adding it would reach either threshold. A single partition larger than the
/// thresholds still gets a batch of its own.
pub fn threshold_batches(
    partitions: Vec<InboundPartition>,
    thresholds: BatchThresholds,
) -> Vec<Vec<SourceFileRef>> {
    let mut batches = Vec::new();
    let mut current: Vec<SourceFileRef> = Vec::new();
    let mut running_bytes = 0u64;
    let mut running_files = 0usize;

    for partition in partitions {
        let partition_bytes = partition.size_bytes();
        let partition_files = partition.file_count();

        let over_bytes = running_bytes + partition_bytes >= thresholds.max_bytes;
        let over_files = running_files + partition_files >= thresholds.max_files;
        if (over_bytes || over_files) && !current.is_empty() {
            batches.push(std::mem::take(&mut current));
            running_bytes = 0;
            running_files = 0;
        }

        running_bytes += partition_bytes;
        running_files += partition_files;
        current.extend(partition.files);
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Lists a table's inbound folder and cuts it into batches.
pub struct PartitionBatcher {
    store: Arc<dyn ObjectStore>,
    config: Arc<RunConfig>,
}

impl PartitionBatcher {
    pub fn new(store: Arc<dyn ObjectStore>, config: Arc<RunConfig>) -> Self {
        Self { store, config }
    }

    pub async fn batches(&self, table: &str) -> Result<Vec<LoadBatch>> {
        let prefix = self.config.inbound_prefix(table);
        let objects = self.store.list(&self.config.source_bucket, &prefix).await?;

        let partitions = group_partitions(&objects);
        debug!(
            table = %table,
            objects = objects.len(),
            partitions = partitions.len(),
            "Grouped inbound files by timestamp"
        );

        let batches: Vec<LoadBatch> = threshold_batches(partitions, self.config.thresholds)
            .into_iter()
            .map(|files| LoadBatch {
                files: files
                    .into_iter()
                    .map(|f| S3Uri::new(&self.config.source_bucket, f.key))
                    .collect(),
            })
            .collect();

        info!(
            table = %table,
            prefix = %format!("s3://{}/{}", self.config.source_bucket, prefix),
            batches = batches.len(),
            files = batches.iter().map(LoadBatch::len).sum::<usize>(),
            "Inbound files batched"
        );
        Ok(batches)
    }
}
