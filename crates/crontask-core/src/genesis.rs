use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::params::Params;
use crate::types::Task;

/// Complete scheduler state for import and export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisState {
    #[serde(default)]
    pub params: Params,
    #[serde(default = "first_task_id")]
    pub next_task_id: u64,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Default for GenesisState {
    fn default() -> Self {
        Self {
            params: Params::default(),
            next_task_id: first_task_id(),
            tasks: Vec::new(),
        }
    }
}

fn first_task_id() -> u64 {
    1
}

impl GenesisState {
    pub fn validate(&self) -> Result<()> {
        if self.next_task_id < 1 {
            return Err(CoreError::InvalidGenesis(
                "next task id must be greater than 0".into(),
            ));
        }
        self.params
            .validate()
            .map_err(|e| CoreError::InvalidGenesis(format!("invalid params: {e}")))?;

        let mut seen = HashSet::with_capacity(self.tasks.len());
        for task in &self.tasks {
            let id = task.id.get();
            if id == 0 {
                return Err(CoreError::InvalidGenesis("task id cannot be 0".into()));
            }
            if id >= self.next_task_id {
                return Err(CoreError::InvalidGenesis(format!(
                    "task id {id} is not below next task id {}",
                    self.next_task_id
                )));
            }
            if !seen.insert(id) {
                return Err(CoreError::InvalidGenesis(format!("duplicate task id: {id}")));
            }
            if task.creator.as_str().is_empty() {
                return Err(CoreError::InvalidGenesis(format!("task {id}: empty creator")));
            }
            if task.scheduled_time <= 0 {
                return Err(CoreError::InvalidGenesis(format!(
                    "task {id}: scheduled time must be positive"
                )));
            }
            if task.expiry_time <= task.scheduled_time {
                return Err(CoreError::InvalidGenesis(format!(
                    "task {id}: expiry must be after scheduled time"
                )));
            }
            if task.cost_limit == 0 {
                return Err(CoreError::InvalidGenesis(format!(
                    "task {id}: cost limit must be positive"
                )));
            }
            if !task.cost_price.is_positive() {
                return Err(CoreError::InvalidGenesis(format!(
                    "task {id}: cost price must be positive"
                )));
            }
            if task.operations.is_empty() {
                return Err(CoreError::InvalidGenesis(format!(
                    "task {id}: at least one operation is required"
                )));
            }
        }
        Ok(())
    }
}
