use async_trait::async_trait;
use edh_common::{EdhError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{Checkpoint, ControlJob, ControlStep, ControlTables, GlobalVariable};

/// Serializable image of the three control tables, used for local runs
/// (`--local-control snapshot.json`) and test fixtures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlSnapshot {
    #[serde(default)]
    pub global_variables: Vec<GlobalVariable>,
    #[serde(default)]
    pub jobs: Vec<ControlJob>,
    #[serde(default)]
    pub steps: Vec<ControlStep>,
}

#[derive(Default)]
struct Tables {
    global_variables: HashMap<String, GlobalVariable>,
    jobs: HashMap<String, ControlJob>,
    steps: HashMap<String, ControlStep>,
}

#[derive(Default)]
pub struct MemoryControlTables {
    tables: Mutex<Tables>,
}

impl MemoryControlTables {
    pub fn from_snapshot(snapshot: ControlSnapshot) -> Self {
        let tables = Tables {
            global_variables: snapshot
                .global_variables
                .into_iter()
                .map(|v| (v.name.clone(), v))
                .collect(),
            jobs: snapshot.jobs.into_iter().map(|j| (j.name.clone(), j)).collect(),
            steps: snapshot.steps.into_iter().map(|s| (s.name.clone(), s)).collect(),
        };
        Self {
            tables: Mutex::new(tables),
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let snapshot: ControlSnapshot = serde_json::from_str(&text)?;
        Ok(Self::from_snapshot(snapshot))
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current table contents, steps sorted by name.
    pub fn snapshot(&self) -> ControlSnapshot {
        let tables = self.tables();
        let mut steps: Vec<ControlStep> = tables.steps.values().cloned().collect();
        steps.sort_by(|a, b| a.name.cmp(&b.name));
        ControlSnapshot {
            global_variables: tables.global_variables.values().cloned().collect(),
            jobs: tables.jobs.values().cloned().collect(),
            steps,
        }
    }
}

#[async_trait]
impl ControlTables for MemoryControlTables {
    async fn global_variable(&self, name: &str) -> Result<Option<GlobalVariable>> {
        Ok(self.tables().global_variables.get(name).cloned())
    }

    async fn job(&self, name: &str) -> Result<Option<ControlJob>> {
        Ok(self.tables().jobs.get(name).cloned())
    }

    async fn step(&self, name: &str) -> Result<Option<ControlStep>> {
        Ok(self.tables().steps.get(name).cloned())
    }

    async fn write_checkpoint(&self, step_name: &str, checkpoint: &Checkpoint) -> Result<()> {
        let encoded = checkpoint.encoded_load()?;
        let mut tables = self.tables();
        let step = tables
            .steps
            .get_mut(step_name)
            .ok_or_else(|| EdhError::ControlTable(format!("Step '{}' not found", step_name)))?;

        step.last_successful_load = Some(encoded);
        step.last_load_dttm_utc = Some(checkpoint.last_load_dttm_utc.clone());
        Ok(())
    }
}
