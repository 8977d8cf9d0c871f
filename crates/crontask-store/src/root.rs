use std::sync::Arc;

use crontask_core::Task;

use crate::error::Result;
use crate::kv::{KvStore, WriteBatch};
use crate::prefix::PrefixKv;
use crate::task_store::TaskStore;

/// Namespace of task records and indexes inside the backing store.
pub const TASKS_NAMESPACE: &[u8] = b"crontask/";
/// Namespace of application state (balances, operation data).
pub const STATE_NAMESPACE: &[u8] = b"state/";

/// One backing store split into the task namespace and the application-state
/// namespace.
///
/// [`StateRoot::commit`] writes a task record, its index moves and a batch of
/// state writes in a single [`KvStore::write`] on the backing store: either
/// all of it lands or none of it does.
pub struct StateRoot {
    root: Arc<dyn KvStore>,
    tasks: PrefixKv,
    state: PrefixKv,
    store: Arc<TaskStore>,
}

impl StateRoot {
    pub fn new(root: Arc<dyn KvStore>) -> Self {
        let tasks = PrefixKv::new(root.clone(), TASKS_NAMESPACE);
        let state = PrefixKv::new(root.clone(), STATE_NAMESPACE);
        let store = Arc::new(TaskStore::new(Arc::new(tasks.clone())));
        Self {
            root,
            tasks,
            state,
            store,
        }
    }

    pub fn root(&self) -> &Arc<dyn KvStore> {
        &self.root
    }

    pub fn task_store(&self) -> Arc<TaskStore> {
        self.store.clone()
    }

    /// Application state, keys relative to [`STATE_NAMESPACE`].
    pub fn state(&self) -> Arc<dyn KvStore> {
        Arc::new(self.state.clone())
    }

    /// Persist `task` together with `state_writes` (keys relative to the
    /// state namespace) as one atomic batch.
    pub fn commit(&self, task: &Task, state_writes: WriteBatch) -> Result<()> {
        self.store.put_with(task, |task_batch| {
            let mut batch = self.tasks.prefix_batch(task_batch);
            batch.extend(self.state.prefix_batch(state_writes));
            self.root.write(batch)
        })
    }
}
