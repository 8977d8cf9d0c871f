use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use crontask_core::{Address, Params, TaskId, TaskStatus, Timestamp};

/// Notifications emitted as tasks move through their lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    Created {
        task_id: TaskId,
        creator: Address,
        scheduled_time: Timestamp,
    },
    Deleted {
        task_id: TaskId,
        requester: Address,
    },
    Expired {
        task_id: TaskId,
    },
    /// Execution was attempted; `status` is `Done` or `Failed`.
    Executed {
        task_id: TaskId,
        status: TaskStatus,
        cost_used: u64,
    },
    /// Removed by the cleanup pass.
    Removed {
        task_id: TaskId,
    },
    ParamsUpdated {
        params: Params,
    },
}

/// Non-blocking event publisher. A sink without a channel drops everything.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<TaskEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<TaskEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// try_send never blocks the tick; a full or closed channel loses the event.
    pub fn emit(&self, event: TaskEvent) {
        if let Some(ref tx) = self.tx {
            if let Err(e) = tx.try_send(event) {
                warn!(error = %e, "event channel full or closed, event dropped");
            }
        }
    }
}
