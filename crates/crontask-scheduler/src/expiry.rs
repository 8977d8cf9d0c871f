use std::sync::Arc;

use tracing::{error, info};

use crontask_core::{TaskId, TaskStatus, Timestamp};
use crontask_store::TaskStore;

pub const EXPIRED_ERROR_LOG: &str = "expired before execution";

/// Marks pending tasks whose expiry has passed as `Expired`.
pub struct ExpiryChecker {
    store: Arc<TaskStore>,
}

impl ExpiryChecker {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self { store }
    }

    /// Scans every pending task. Store errors are logged and the task is
    /// skipped. Returns the ids that were expired.
    pub fn run(&self, now: Timestamp) -> Vec<TaskId> {
        let pending = match self.store.ids_by_status(TaskStatus::Pending) {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "expiry scan failed");
                return Vec::new();
            }
        };

        let mut expired = Vec::new();
        for id in pending {
            let mut task = match self.store.get(id) {
                Ok(t) => t,
                Err(e) => {
                    error!(task_id = %id, error = %e, "cannot load pending task, skipping");
                    continue;
                }
            };
            if !task.is_overdue(now) {
                continue;
            }
            if let Err(e) = task.transition(TaskStatus::Expired) {
                error!(task_id = %id, error = %e, "cannot expire task");
                continue;
            }
            task.error_log = EXPIRED_ERROR_LOG.to_string();
            match self.store.put(&task) {
                Ok(()) => {
                    info!(task_id = %id, expiry_time = task.expiry_time, "task expired");
                    expired.push(id);
                }
                Err(e) => error!(task_id = %id, error = %e, "failed to persist expiry"),
            }
        }
        expired
    }
}
