use tracing::info;

use crontask_core::GenesisState;
use crontask_store::TaskStore;

use crate::error::Result;

/// Load a validated genesis state: params, id counter and every task with
/// its index entries.
pub fn init_genesis(store: &TaskStore, genesis: &GenesisState) -> Result<()> {
    genesis.validate()?;

    store.set_params(&genesis.params)?;
    store.set_next_id(genesis.next_task_id)?;
    for task in &genesis.tasks {
        store.put(task)?;
    }

    info!(
        tasks = genesis.tasks.len(),
        next_task_id = genesis.next_task_id,
        "genesis state loaded"
    );
    Ok(())
}

/// Snapshot of the whole scheduler state, tasks in id order.
pub fn export_genesis(store: &TaskStore) -> Result<GenesisState> {
    Ok(GenesisState {
        params: store.params()?,
        next_task_id: store.next_id()?,
        tasks: store.all_tasks()?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crontask_core::{Address, Coin, Operation, Params, Task, TaskId, TaskStatus};
    use crontask_store::{MemoryKv, PageRequest, TaskIndex};

    fn task(id: u64, status: TaskStatus) -> Task {
        Task {
            id: TaskId(id),
            creator: Address::parse("dys1qypqxpq9qcrsszg2").unwrap(),
            scheduled_time: 100 + id as i64,
            expiry_time: 1_000,
            cost_limit: 10,
            cost_fee: Coin::new("dys", 100),
            cost_price: Coin::new("dys", 10),
            operations: vec![Operation::new("state.put", serde_json::json!({"key": "k"}))],
            results: vec![],
            status,
            error_log: String::new(),
            creation_time: 50,
            execution_time: None,
            cost_used: 0,
        }
    }

    #[test]
    fn import_then_export_matches() {
        let genesis = GenesisState {
            params: Params {
                cleanup_after: 0,
                ..Params::default()
            },
            next_task_id: 5,
            tasks: vec![task(2, TaskStatus::Pending), task(4, TaskStatus::Done)],
        };
        let store = TaskStore::new(Arc::new(MemoryKv::new()));
        init_genesis(&store, &genesis).unwrap();

        assert_eq!(export_genesis(&store).unwrap(), genesis);
        // Indexes were rebuilt.
        let done = store
            .iterate(&TaskIndex::StatusTime(TaskStatus::Done), &PageRequest::default())
            .unwrap();
        assert_eq!(done.items, vec![TaskId(4)]);
        // New ids continue after the imported counter.
        assert_eq!(store.next_id().unwrap(), 5);
    }

    #[test]
    fn invalid_genesis_writes_nothing() {
        let genesis = GenesisState {
            next_task_id: 2,
            tasks: vec![task(3, TaskStatus::Pending)],
            ..Default::default()
        };
        let store = TaskStore::new(Arc::new(MemoryKv::new()));
        let err = init_genesis(&store, &genesis).unwrap_err();
        assert_eq!(err.code(), "INVALID_GENESIS");
        assert!(store.stored_params().unwrap().is_none());
    }
}
