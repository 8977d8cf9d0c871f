use std::sync::Arc;

use crontask_core::{Address, Params, Task, TaskId, TaskStatus};
use crontask_store::{Page, PageRequest, TaskIndex, TaskStore};

use crate::error::Result;

/// Read-only views over the task store.
pub struct TaskQuery {
    store: Arc<TaskStore>,
}

impl TaskQuery {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self { store }
    }

    pub fn task_by_id(&self, id: TaskId) -> Result<Task> {
        Ok(self.store.get(id)?)
    }

    pub fn tasks_by_creator(&self, creator: &str, page: &PageRequest) -> Result<Page<Task>> {
        let creator = Address::parse(creator)?;
        Ok(self.store.tasks(&TaskIndex::Creator(creator), page)?)
    }

    /// Ascending by `scheduled_time` unless `page.reverse`.
    pub fn tasks_by_status_and_time(
        &self,
        status: TaskStatus,
        page: &PageRequest,
    ) -> Result<Page<Task>> {
        Ok(self.store.tasks(&TaskIndex::StatusTime(status), page)?)
    }

    /// Ascending by `cost_price` unless `page.reverse`.
    pub fn tasks_by_status_and_price(
        &self,
        status: TaskStatus,
        page: &PageRequest,
    ) -> Result<Page<Task>> {
        Ok(self.store.tasks(&TaskIndex::StatusPrice(status), page)?)
    }

    pub fn all_tasks(&self, page: &PageRequest) -> Result<Page<Task>> {
        Ok(self.store.tasks(&TaskIndex::All, page)?)
    }

    pub fn params(&self) -> Result<Params> {
        Ok(self.store.params()?)
    }
}
