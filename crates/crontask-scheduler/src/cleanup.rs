use std::sync::Arc;

use tracing::{debug, error};

use crontask_core::{TaskId, TaskStatus, Timestamp};
use crontask_store::TaskStore;

const TERMINAL: [TaskStatus; 3] = [TaskStatus::Done, TaskStatus::Failed, TaskStatus::Expired];

/// Deletes terminal tasks that were scheduled at least `retention` seconds ago.
pub struct Cleaner {
    store: Arc<TaskStore>,
}

impl Cleaner {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self { store }
    }

    /// `retention == 0` disables the pass.
    pub fn run(&self, now: Timestamp, retention: i64) -> Vec<TaskId> {
        if retention <= 0 {
            return Vec::new();
        }
        let cutoff = now.saturating_sub(retention);

        let mut removed = Vec::new();
        for status in TERMINAL {
            let ids = match self.store.ids_scheduled_until(status, cutoff) {
                Ok(ids) => ids,
                Err(e) => {
                    error!(%status, error = %e, "cleanup scan failed");
                    continue;
                }
            };
            for id in ids {
                match self.store.delete(id) {
                    Ok(_) => {
                        debug!(task_id = %id, %status, "old task removed");
                        removed.push(id);
                    }
                    Err(e) => error!(task_id = %id, error = %e, "cleanup delete failed"),
                }
            }
        }
        removed
    }
}
