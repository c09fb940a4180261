use async_trait::async_trait;
use aws_sdk_dynamodb::{
    operation::update_item::builders::UpdateItemFluentBuilder,
    types::{AttributeValue, ReturnValue},
    Client,
};
use edh_common::{EdhError, Result};
use std::collections::HashMap;
use tracing::{debug, instrument};

use super::{Checkpoint, ControlJob, ControlStep, ControlTables, GlobalVariable};
use crate::settings::{ControlTableNames, EngineSettings};

type Item = HashMap<String, AttributeValue>;

/// DynamoDB-backed control tables. Every table is keyed by the string
/// attribute `name`.
#[derive(Clone)]
pub struct DynamoControlTables {
    client: Client,
    names: ControlTableNames,
}

impl DynamoControlTables {
    pub fn new(
        sdk_config: &aws_config::SdkConfig,
        settings: &EngineSettings,
        names: ControlTableNames,
    ) -> Self {
        let mut builder = aws_sdk_dynamodb::config::Builder::from(sdk_config);
        if let Some(endpoint) = &settings.dynamodb_endpoint {
            debug!(endpoint = %endpoint, "Using custom DynamoDB endpoint");
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
            names,
        }
    }

    async fn get_item(&self, table: &str, name: &str) -> Result<Option<Item>> {
        let response = self
            .client
            .get_item()
            .table_name(table)
            .key("name", AttributeValue::S(name.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| {
                EdhError::ControlTable(format!("Failed to read '{}' from {}: {}", name, table, e))
            })?;

        Ok(response.item().cloned())
    }

    /// Only the two checkpoint attributes are set, and only on an existing
    /// step row.
    fn checkpoint_update(
        &self,
        step_name: &str,
        checkpoint: &Checkpoint,
    ) -> Result<UpdateItemFluentBuilder> {
        Ok(self
            .client
            .update_item()
            .table_name(&self.names.steps)
            .key("name", AttributeValue::S(step_name.to_string()))
            .condition_expression("attribute_exists(#n)")
            .expression_attribute_names("#n", "name")
            .update_expression("SET last_successful_load = :f, last_load_dttm_utc = :d")
            .expression_attribute_values(":f", AttributeValue::S(checkpoint.encoded_load()?))
            .expression_attribute_values(
                ":d",
                AttributeValue::S(checkpoint.last_load_dttm_utc.clone()),
            )
            .return_values(ReturnValue::UpdatedNew))
    }
}

fn string_attr(item: &Item, attr: &str) -> Option<String> {
    item.get(attr).and_then(|v| v.as_s().ok()).cloned()
}

fn required_string(item: &Item, attr: &str, table: &str) -> Result<String> {
    string_attr(item, attr).ok_or_else(|| {
        EdhError::ControlTable(format!("Record in {} has no string attribute '{}'", table, attr))
    })
}

/// `active` is a BOOL in provisioned tables; hand-edited rows sometimes carry
/// it as a number or string.
fn active_attr(item: &Item) -> bool {
    match item.get("active") {
        Some(AttributeValue::Bool(b)) => *b,
        Some(AttributeValue::N(n)) => n.parse::<f64>().map(|v| v != 0.0).unwrap_or(false),
        Some(AttributeValue::S(s)) => matches!(s.to_ascii_lowercase().as_str(), "true" | "1"),
        _ => false,
    }
}

/// Missing `arguments` read as empty, so inactive rows are still skipped and
/// active ones fail step parsing instead of the lookup.
fn step_from_item(item: &Item, table: &str) -> Result<ControlStep> {
    Ok(ControlStep {
        name: required_string(item, "name", table)?,
        active: active_attr(item),
        arguments: string_attr(item, "arguments").unwrap_or_default(),
        last_successful_load: string_attr(item, "last_successful_load").filter(|s| !s.is_empty()),
        last_load_dttm_utc: string_attr(item, "last_load_dttm_utc").filter(|s| !s.is_empty()),
    })
}

#[async_trait]
impl ControlTables for DynamoControlTables {
    #[instrument(skip(self))]
    async fn global_variable(&self, name: &str) -> Result<Option<GlobalVariable>> {
        let table = &self.names.global_variables;
        self.get_item(table, name)
            .await?
            .map(|item| {
                Ok(GlobalVariable {
                    name: name.to_string(),
                    value: required_string(&item, "value", table)?,
                })
            })
            .transpose()
    }

    #[instrument(skip(self))]
    async fn job(&self, name: &str) -> Result<Option<ControlJob>> {
        let table = &self.names.jobs;
        self.get_item(table, name)
            .await?
            .map(|item| {
                Ok(ControlJob {
                    name: name.to_string(),
                    active: active_attr(&item),
                    arguments: string_attr(&item, "arguments").unwrap_or_default(),
                })
            })
            .transpose()
    }

    #[instrument(skip(self))]
    async fn step(&self, name: &str) -> Result<Option<ControlStep>> {
        let table = &self.names.steps;
        self.get_item(table, name)
            .await?
            .map(|item| step_from_item(&item, table))
            .transpose()
    }

    #[instrument(skip(self, checkpoint))]
    async fn write_checkpoint(&self, step_name: &str, checkpoint: &Checkpoint) -> Result<()> {
        let response = self
            .checkpoint_update(step_name, checkpoint)?
            .send()
            .await
            .map_err(|e| {
                let missing = e
                    .as_service_error()
                    .is_some_and(|s| s.is_conditional_check_failed_exception());
                if missing {
                    EdhError::ControlTable(format!("Step '{}' not found", step_name))
                } else {
                    EdhError::ControlTable(format!(
                        "Failed to write checkpoint for '{}': {}",
                        step_name, e
                    ))
                }
            })?;

        debug!(
            step = %step_name,
            updated = ?response.attributes().map(|a| a.keys().collect::<Vec<_>>()),
            "Checkpoint update acknowledged"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::StepConfig;
    use aws_config::{BehaviorVersion, Region};

    fn item(pairs: Vec<(&str, AttributeValue)>) -> Item {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_active_attribute_variants() {
        assert!(active_attr(&item(vec![("active", AttributeValue::Bool(true))])));
        assert!(active_attr(&item(vec![("active", AttributeValue::N("1".into()))])));
        assert!(active_attr(&item(vec![("active", AttributeValue::S("True".into()))])));
        assert!(!active_attr(&item(vec![("active", AttributeValue::Bool(false))])));
        assert!(!active_attr(&item(vec![])));
    }

    #[test]
    fn test_step_from_item() {
        let record = item(vec![
            ("name", AttributeValue::S("jobA-1".into())),
            ("active", AttributeValue::Bool(true)),
            ("arguments", AttributeValue::S(r#"{"name":"orders","file_type":"csv"}"#.into())),
            ("last_load_dttm_utc", AttributeValue::S("20240101000000".into())),
        ]);

        let step = step_from_item(&record, "control_step").unwrap();
        assert_eq!(step.name, "jobA-1");
        assert!(step.active);
        assert!(step.last_successful_load.is_none());
        assert_eq!(step.last_load_dttm_utc.as_deref(), Some("20240101000000"));
    }

    #[test]
    fn test_step_without_arguments_reads_as_empty() {
        let inactive = item(vec![
            ("name", AttributeValue::S("jobA-1".into())),
            ("active", AttributeValue::Bool(false)),
        ]);
        let step = step_from_item(&inactive, "control_step").unwrap();
        assert!(!step.active);
        assert_eq!(step.arguments, "");

        let active = item(vec![
            ("name", AttributeValue::S("jobA-2".into())),
            ("active", AttributeValue::Bool(true)),
        ]);
        let step = step_from_item(&active, "control_step").unwrap();
        let err = StepConfig::from_record(&step).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_step_without_name_is_an_error() {
        let record = item(vec![("active", AttributeValue::Bool(true))]);
        assert!(step_from_item(&record, "control_step").is_err());
    }

    #[tokio::test]
    async fn test_checkpoint_update_requires_existing_step() {
        let sdk_config = aws_config::SdkConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .build();
        let tables = DynamoControlTables::new(
            &sdk_config,
            &EngineSettings::default(),
            ControlTableNames {
                global_variables: "global_variables".into(),
                jobs: "control_job".into(),
                steps: "control_job_step".into(),
            },
        );

        let update = tables
            .checkpoint_update("jobA-1", &Checkpoint::new(vec!["a_1.csv".into()], "20240101000000"))
            .unwrap();
        let input = update.as_input();
        assert_eq!(input.get_condition_expression().as_deref(), Some("attribute_exists(#n)"));
        assert_eq!(
            input.get_expression_attribute_names().as_ref().and_then(|n| n.get("#n")).map(String::as_str),
            Some("name")
        );
        assert_eq!(input.get_table_name().as_deref(), Some("control_job_step"));
    }
}
