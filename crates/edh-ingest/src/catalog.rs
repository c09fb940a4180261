//! Table catalog registration
//!
//! Every lake write lands in a Hive-style partition folder
//! (`.../<table>/edh_processed_dttm_utc=<ts>/`). [`TableCatalog`] makes that
//! partition queryable. [`GlueCatalog`] registers it in the AWS Glue Data
//! Catalog as an external Parquet table whose columns are all strings;
//! [`MemoryCatalog`] records registrations for tests and local runs.

use async_trait::async_trait;
use aws_sdk_glue::types::{Column, PartitionInput, SerDeInfo, StorageDescriptor, TableInput};
use aws_sdk_glue::Client;
use edh_common::{EdhError, Result};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};

use crate::settings::EngineSettings;

/// Partition column added to every lake table.
pub const PARTITION_COLUMN: &str = "edh_processed_dttm_utc";

const PARQUET_INPUT_FORMAT: &str = "org.apache.hadoop.hive.ql.io.parquet.MapredParquetInputFormat";
const PARQUET_OUTPUT_FORMAT: &str =
    "org.apache.hadoop.hive.ql.io.parquet.MapredParquetOutputFormat";
const PARQUET_SERDE: &str = "org.apache.hadoop.hive.ql.io.parquet.serde.ParquetHiveSerDe";

/// One written partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRegistration {
    pub database: String,
    pub table: String,
    /// Data columns, excluding the partition column
    pub columns: Vec<String>,
    pub partition_value: String,
    /// `s3://bucket/prefix/table/`
    pub table_location: String,
    /// `s3://bucket/prefix/table/edh_processed_dttm_utc=<ts>/`
    pub partition_location: String,
}

#[async_trait]
pub trait TableCatalog: Send + Sync {
    /// Make sure the table exists with at least `columns`, then add the
    /// partition. Registering the same partition twice is not an error.
    async fn register_partition(&self, registration: &PartitionRegistration) -> Result<()>;
}

// ============================================================================
// AWS Glue
// ============================================================================

pub struct GlueCatalog {
    client: Client,
    catalog_id: Option<String>,
}

fn string_column(name: &str) -> Result<Column> {
    Column::builder()
        .name(name)
        .r#type("string")
        .build()
        .map_err(|e| EdhError::Catalog(format!("Invalid column '{}': {}", name, e)))
}

fn parquet_descriptor(columns: Vec<Column>, location: &str) -> StorageDescriptor {
    StorageDescriptor::builder()
        .set_columns(Some(columns))
        .location(location)
        .input_format(PARQUET_INPUT_FORMAT)
        .output_format(PARQUET_OUTPUT_FORMAT)
        .serde_info(
            SerDeInfo::builder()
                .serialization_library(PARQUET_SERDE)
                .parameters("serialization.format", "1")
                .build(),
        )
        .compressed(true)
        .build()
}

fn table_input(name: &str, columns: Vec<Column>, location: &str) -> Result<TableInput> {
    TableInput::builder()
        .name(name)
        .table_type("EXTERNAL_TABLE")
        .parameters("classification", "parquet")
        .parameters("compressionType", "snappy")
        .parameters("EXTERNAL", "TRUE")
        .storage_descriptor(parquet_descriptor(columns, location))
        .partition_keys(string_column(PARTITION_COLUMN)?)
        .build()
        .map_err(|e| EdhError::Catalog(format!("Invalid table input for '{}': {}", name, e)))
}

impl GlueCatalog {
    pub fn new(sdk_config: &aws_config::SdkConfig, settings: &EngineSettings) -> Self {
        Self {
            client: Client::new(sdk_config),
            catalog_id: settings.glue_catalog_id.clone(),
        }
    }

    /// Current data columns, or `None` when the table does not exist yet.
    async fn existing_columns(&self, database: &str, table: &str) -> Result<Option<Vec<String>>> {
        let response = self
            .client
            .get_table()
            .set_catalog_id(self.catalog_id.clone())
            .database_name(database)
            .name(table)
            .send()
            .await;

        match response {
            Ok(output) => Ok(Some(
                output
                    .table()
                    .and_then(|t| t.storage_descriptor())
                    .map(|sd| sd.columns().iter().map(|c| c.name().to_string()).collect())
                    .unwrap_or_default(),
            )),
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_entity_not_found_exception()) =>
            {
                Ok(None)
            },
            Err(e) => Err(EdhError::Catalog(format!(
                "Failed to read table {}.{}: {}",
                database, table, e
            ))),
        }
    }

    async fn ensure_table(&self, registration: &PartitionRegistration) -> Result<()> {
        let PartitionRegistration {
            database, table, ..
        } = registration;

        let merged = match self.existing_columns(database, table).await? {
            None => {
                let columns = registration
                    .columns
                    .iter()
                    .map(|c| string_column(c))
                    .collect::<Result<Vec<_>>>()?;
                let result = self
                    .client
                    .create_table()
                    .set_catalog_id(self.catalog_id.clone())
                    .database_name(database)
                    .table_input(table_input(table, columns, &registration.table_location)?)
                    .send()
                    .await;

                return match result {
                    Ok(_) => {
                        info!(database = %database, table = %table, "Created catalog table");
                        Ok(())
                    },
                    // Lost a race with another writer; fall through on the next write.
                    Err(e)
                        if e.as_service_error()
                            .is_some_and(|se| se.is_already_exists_exception()) =>
                    {
                        Ok(())
                    },
                    Err(e) => Err(EdhError::Catalog(format!(
                        "Failed to create table {}.{}: {}",
                        database, table, e
                    ))),
                };
            },
            Some(existing) => {
                let missing: Vec<&String> = registration
                    .columns
                    .iter()
                    .filter(|c| !existing.contains(c))
                    .collect();
                if missing.is_empty() {
                    return Ok(());
                }
                debug!(table = %table, new_columns = ?missing, "Extending catalog table");
                existing
                    .iter()
                    .chain(missing.into_iter())
                    .cloned()
                    .collect::<Vec<String>>()
            },
        };

        let columns = merged
            .iter()
            .map(|c| string_column(c))
            .collect::<Result<Vec<_>>>()?;
        self.client
            .update_table()
            .set_catalog_id(self.catalog_id.clone())
            .database_name(database)
            .table_input(table_input(table, columns, &registration.table_location)?)
            .send()
            .await
            .map_err(|e| {
                EdhError::Catalog(format!("Failed to update table {}.{}: {}", database, table, e))
            })?;

        info!(database = %database, table = %table, columns = merged.len(), "Extended catalog table");
        Ok(())
    }
}

#[async_trait]
impl TableCatalog for GlueCatalog {
    #[instrument(skip(self, registration), fields(table = %registration.table, partition = %registration.partition_value))]
    async fn register_partition(&self, registration: &PartitionRegistration) -> Result<()> {
        self.ensure_table(registration).await?;

        let columns = registration
            .columns
            .iter()
            .map(|c| string_column(c))
            .collect::<Result<Vec<_>>>()?;
        let partition = PartitionInput::builder()
            .values(&registration.partition_value)
            .storage_descriptor(parquet_descriptor(columns, &registration.partition_location))
            .build();

        let result = self
            .client
            .create_partition()
            .set_catalog_id(self.catalog_id.clone())
            .database_name(&registration.database)
            .table_name(&registration.table)
            .partition_input(partition)
            .send()
            .await;

        match result {
            Ok(_) => {},
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_already_exists_exception()) =>
            {
                debug!("Partition already registered");
            },
            Err(e) => {
                return Err(EdhError::Catalog(format!(
                    "Failed to add partition {}={} to {}.{}: {}",
                    PARTITION_COLUMN,
                    registration.partition_value,
                    registration.database,
                    registration.table,
                    e
                )))
            },
        }

        info!(location = %registration.partition_location, "Partition registered");
        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default)]
struct CatalogState {
    tables: BTreeMap<(String, String), Vec<String>>,
    partitions: Vec<PartitionRegistration>,
}

/// Catalog that only remembers what it was told.
#[derive(Default)]
pub struct MemoryCatalog {
    state: Mutex<CatalogState>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn partitions(&self) -> Vec<PartitionRegistration> {
        self.state().partitions.clone()
    }

    /// Columns of `database.table` in registration order.
    pub fn table_columns(&self, database: &str, table: &str) -> Option<Vec<String>> {
        self.state()
            .tables
            .get(&(database.to_string(), table.to_string()))
            .cloned()
    }
}

#[async_trait]
impl TableCatalog for MemoryCatalog {
    async fn register_partition(&self, registration: &PartitionRegistration) -> Result<()> {
        let mut state = self.state();

        let columns = state
            .tables
            .entry((registration.database.clone(), registration.table.clone()))
            .or_default();
        for column in &registration.columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }

        let known = state.partitions.iter().any(|p| {
            p.database == registration.database
                && p.table == registration.table
                && p.partition_value == registration.partition_value
        });
        if !known {
            state.partitions.push(registration.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn registration(columns: &[&str], value: &str) -> PartitionRegistration {
        PartitionRegistration {
            database: "edh_raw".into(),
            table: "orders".into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            partition_value: value.into(),
            table_location: "s3://lake/lake/orders/".into(),
            partition_location: format!("s3://lake/lake/orders/{}={}/", PARTITION_COLUMN, value),
        }
    }

    #[tokio::test]
    async fn test_memory_catalog_extends_columns() {
        let catalog = MemoryCatalog::new();
        catalog.register_partition(&registration(&["id", "name"], "1")).await.unwrap();
        catalog.register_partition(&registration(&["id", "city"], "2")).await.unwrap();

        assert_eq!(
            catalog.table_columns("edh_raw", "orders").unwrap(),
            vec!["id", "name", "city"]
        );
        assert_eq!(catalog.partitions().len(), 2);
    }

    #[tokio::test]
    async fn test_memory_catalog_tolerates_repeat_partition() {
        let catalog = MemoryCatalog::new();
        catalog.register_partition(&registration(&["id"], "1")).await.unwrap();
        catalog.register_partition(&registration(&["id"], "1")).await.unwrap();
        assert_eq!(catalog.partitions().len(), 1);
    }

    #[test]
    fn test_glue_table_input_is_partitioned_parquet() {
        let columns = vec![string_column("id").unwrap()];
        let input = table_input("orders", columns, "s3://lake/lake/orders/").unwrap();

        assert_eq!(input.name(), "orders");
        assert_eq!(input.partition_keys()[0].name(), PARTITION_COLUMN);
        let sd = input.storage_descriptor().unwrap();
        assert_eq!(sd.location(), Some("s3://lake/lake/orders/"));
        assert_eq!(sd.input_format(), Some(PARQUET_INPUT_FORMAT));
        assert_eq!(sd.columns()[0].r#type(), Some("string"));
    }
}
