//! Lake writer
//!
//! A batch's tables are stacked by column name and written as one Snappy
//! Parquet object under a Hive-style partition folder named after the batch
//! processing timestamp:
//!
//! ```text
//! s3://<target_bucket>/<target_prefix>/<table>/edh_processed_dttm_utc=<ts>/<uuid>.snappy.parquet
//! ```
//!
//! All columns are nullable UTF-8. The partition value lives in the path, not
//! in the file.

use arrow::array::{ArrayRef, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use edh_common::uri::join_key;
use edh_common::{EdhError, Result};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::io::Cursor;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::catalog::{PartitionRegistration, TableCatalog, PARTITION_COLUMN};
use crate::config::RunConfig;
use crate::storage::ObjectStore;
use crate::table::Table;

const PARQUET_CONTENT_TYPE: &str = "application/vnd.apache.parquet";

/// What a non-empty write produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSummary {
    pub object_uri: String,
    pub partition_location: String,
    pub rows: usize,
    pub columns: Vec<String>,
}

/// Encode `table` as a Snappy Parquet file with nullable string columns.
pub fn encode_parquet(table: &Table) -> Result<Bytes> {
    let schema = Arc::new(Schema::new(
        table
            .columns()
            .iter()
            .map(|name| Field::new(name, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ));

    let arrays: Vec<ArrayRef> = (0..table.num_columns())
        .map(|idx| {
            let values: StringArray =
                table.rows().iter().map(|row| row[idx].as_deref()).collect();
            Arc::new(values) as ArrayRef
        })
        .collect();

    let batch = RecordBatch::try_new(schema.clone(), arrays)
        .map_err(|e| EdhError::Write(format!("Failed to build record batch: {}", e)))?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut buffer = Cursor::new(Vec::new());
    let mut writer = ArrowWriter::try_new(&mut buffer, schema, Some(props))
        .map_err(|e| EdhError::Write(format!("Failed to create Parquet writer: {}", e)))?;
    writer
        .write(&batch)
        .map_err(|e| EdhError::Write(format!("Failed to write Parquet rows: {}", e)))?;
    writer
        .close()
        .map_err(|e| EdhError::Write(format!("Failed to close Parquet writer: {}", e)))?;

    Ok(Bytes::from(buffer.into_inner()))
}

pub struct LakeWriter {
    store: Arc<dyn ObjectStore>,
    catalog: Option<Arc<dyn TableCatalog>>,
    config: Arc<RunConfig>,
}

impl LakeWriter {
    /// `catalog: None` writes the objects without registering partitions.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        catalog: Option<Arc<dyn TableCatalog>>,
        config: Arc<RunConfig>,
    ) -> Self {
        Self {
            store,
            catalog,
            config,
        }
    }

    /// Lake folder for `table` (lower-cased), with a trailing slash.
    pub fn table_prefix(&self, table: &str) -> String {
        join_key(&[&self.config.target_prefix, &format!("{}/", table.to_lowercase())])
    }

    /// Write one batch. Returns `None` when there are no rows.
    pub async fn write_batch(
        &self,
        table_name: &str,
        tables: Vec<Table>,
        processed_dttm: &str,
    ) -> Result<Option<WriteSummary>> {
        let merged = Table::concat(tables);
        if merged.is_empty() {
            return Ok(None);
        }

        let columns = merged.columns().to_vec();
        let body = encode_parquet(&merged)?;

        let lake_table = table_name.to_lowercase();
        let table_prefix = self.table_prefix(table_name);
        let partition_prefix = join_key(&[
            &table_prefix,
            &format!("{}={}/", PARTITION_COLUMN, processed_dttm),
        ]);
        let key = join_key(&[
            &partition_prefix,
            &format!("{}.snappy.parquet", Uuid::new_v4()),
        ]);

        let bucket = &self.config.target_bucket;
        self.store
            .put(bucket, &key, body, Some(PARQUET_CONTENT_TYPE))
            .await?;

        let summary = WriteSummary {
            object_uri: format!("s3://{}/{}", bucket, key),
            partition_location: format!("s3://{}/{}", bucket, partition_prefix),
            rows: merged.num_rows(),
            columns: columns.clone(),
        };

        if let Some(catalog) = &self.catalog {
            catalog
                .register_partition(&PartitionRegistration {
                    database: self.config.database_name.clone(),
                    table: lake_table,
                    columns,
                    partition_value: processed_dttm.to_string(),
                    table_location: format!("s3://{}/{}", bucket, table_prefix),
                    partition_location: summary.partition_location.clone(),
                })
                .await?;
        }

        info!(
            table = %table_name,
            rows = summary.rows,
            location = %summary.partition_location,
            "[DONE - LAKE] Batch written"
        );
        Ok(Some(summary))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::config::{BatchThresholds, StepRange};
    use crate::storage::MemoryObjectStore;
    use arrow::array::Array;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    fn run_config() -> RunConfig {
        RunConfig {
            job_name: "jobA".into(),
            source_bucket: "raw".into(),
            source_prefix: "inbound/".into(),
            target_bucket: "lake".into(),
            target_prefix: "lake/".into(),
            processed_prefix: "processed/".into(),
            rejected_prefix: "rejected/".into(),
            corrupted_prefix: "corrupt/".into(),
            database_name: "edh_raw".into(),
            edh_columns: vec![],
            replace_rules: vec![],
            thresholds: BatchThresholds::default(),
            steps: StepRange::OpenEnded { start: 1 },
        }
    }

    fn table(columns: &[&str], rows: Vec<Vec<Option<&str>>>) -> Table {
        Table::from_rows(
            columns.iter().map(|c| c.to_string()).collect(),
            rows.into_iter()
                .map(|r| r.into_iter().map(|c| c.map(str::to_string)).collect())
                .collect(),
        )
    }

    #[test]
    fn test_parquet_round_trip_keeps_nulls() {
        let t = table(&["id", "name"], vec![vec![Some("1"), None], vec![Some("2"), Some("b")]]);
        let body = encode_parquet(&t).unwrap();

        let reader = ParquetRecordBatchReaderBuilder::try_new(body).unwrap().build().unwrap();
        let batches: Vec<RecordBatch> = reader.collect::<std::result::Result<_, _>>().unwrap();
        let batch = &batches[0];

        assert_eq!(batch.num_rows(), 2);
        let schema = batch.schema();
        assert_eq!(schema.field(1).name(), "name");
        assert_eq!(schema.field(1).data_type(), &DataType::Utf8);
        assert!(schema.field(1).is_nullable());

        let names = batch.column(1).as_any().downcast_ref::<StringArray>().unwrap();
        assert!(names.is_null(0));
        assert_eq!(names.value(1), "b");
    }

    #[tokio::test]
    async fn test_write_batch_layout_and_registration() {
        let store = Arc::new(MemoryObjectStore::new());
        let catalog = Arc::new(MemoryCatalog::new());
        let writer = LakeWriter::new(store.clone(), Some(catalog.clone()), Arc::new(run_config()));

        let summary = writer
            .write_batch(
                "Orders",
                vec![
                    table(&["id", "name"], vec![vec![Some("1"), Some("a")]]),
                    table(&["id", "city"], vec![vec![Some("2"), Some("Oslo")]]),
                ],
                "20240102030405",
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(summary.rows, 2);
        assert_eq!(summary.columns, vec!["id", "name", "city"]);
        assert_eq!(
            summary.partition_location,
            "s3://lake/lake/orders/edh_processed_dttm_utc=20240102030405/"
        );

        let keys = store.keys("lake", "lake/orders/edh_processed_dttm_utc=20240102030405/");
        assert_eq!(keys.len(), 1);
        assert!(keys[0].ends_with(".snappy.parquet"));

        let partitions = catalog.partitions();
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].table, "orders");
        assert_eq!(partitions[0].partition_value, "20240102030405");
    }

    #[tokio::test]
    async fn test_empty_batch_writes_nothing() {
        let store = Arc::new(MemoryObjectStore::new());
        let writer = LakeWriter::new(store.clone(), None, Arc::new(run_config()));

        let written = writer
            .write_batch("orders", vec![table(&["id"], vec![])], "20240102030405")
            .await
            .unwrap();
        assert!(written.is_none());
        assert!(store.keys("lake", "").is_empty());
    }
}
