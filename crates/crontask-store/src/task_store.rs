use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crontask_core::{Address, Params, Task, TaskId, TaskStatus, Timestamp};

use crate::error::{Result, StoreError};
use crate::keys::{self, NEXT_ID_KEY, PARAMS_KEY};
use crate::kv::{KvStore, ScanRange, WriteBatch};
use crate::page::{Page, PageRequest};

/// Which ordering to iterate tasks in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskIndex {
    /// Primary records, ascending by id.
    All,
    /// Tasks of one creator, ascending by id.
    Creator(Address),
    /// Tasks in one status, ascending by `(scheduled_time, id)`.
    StatusTime(TaskStatus),
    /// Tasks in one status, ascending by `(cost_price, id)`.
    StatusPrice(TaskStatus),
}

impl TaskIndex {
    pub fn prefix(&self) -> Vec<u8> {
        match self {
            TaskIndex::All => keys::task_prefix(),
            TaskIndex::Creator(creator) => keys::creator_prefix(creator),
            TaskIndex::StatusTime(status) => keys::status_time_prefix(*status),
            TaskIndex::StatusPrice(status) => keys::status_price_prefix(*status),
        }
    }
}

/// Task records plus their three secondary indexes over a [`KvStore`].
///
/// Every mutation goes out as a single [`WriteBatch`], so the primary record
/// and its index entries are always written or rolled back together.
pub struct TaskStore {
    kv: Arc<dyn KvStore>,
    /// Serialises read-modify-write sequences (id allocation, index diffs).
    write_lock: Mutex<()>,
}

impl TaskStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            write_lock: Mutex::new(()),
        }
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock.lock().map_err(|_| StoreError::LockPoisoned)
    }

    // --- records -----------------------------------------------------------

    pub fn find(&self, id: TaskId) -> Result<Option<Task>> {
        match self.kv.get(&keys::task_key(id))? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn get(&self, id: TaskId) -> Result<Task> {
        self.find(id)?.ok_or(StoreError::NotFound(id))
    }

    /// Allocates the next id, hands it to `build` and persists the result
    /// together with the bumped counter and the index entries.
    pub fn create<F>(&self, build: F) -> Result<Task>
    where
        F: FnOnce(TaskId) -> Task,
    {
        let _guard = self.lock()?;
        let id = TaskId(self.next_id()?);
        if self.kv.has(&keys::task_key(id))? {
            return Err(StoreError::Corrupt(format!(
                "id counter points at existing task {id}"
            )));
        }

        let mut task = build(id);
        task.id = id;

        let mut batch = WriteBatch::new();
        batch.put(NEXT_ID_KEY, (id.get() + 1).to_be_bytes().to_vec());
        batch.put(keys::task_key(id), serde_json::to_vec(&task)?);
        for key in keys::index_keys(&task) {
            batch.put(key, Vec::new());
        }
        self.kv.write(batch)?;

        debug!(task_id = %id, "task record created");
        Ok(task)
    }

    /// Inserts or replaces a record, moving exactly the index entries whose
    /// attributes changed.
    pub fn put(&self, task: &Task) -> Result<()> {
        self.put_with(task, |batch| self.kv.write(batch))
    }

    /// Like [`TaskStore::put`], but hands the record batch to `commit`
    /// instead of writing it, so the caller can add writes from elsewhere and
    /// apply everything at once. `commit` runs under the store's write lock.
    pub fn put_with<F>(&self, task: &Task, commit: F) -> Result<()>
    where
        F: FnOnce(WriteBatch) -> Result<()>,
    {
        let _guard = self.lock()?;
        let previous = self.find(task.id)?;

        let new_keys = keys::index_keys(task);
        let mut batch = WriteBatch::new();

        match &previous {
            Some(old) => {
                if !old.status.can_transition_to(task.status) {
                    return Err(StoreError::IllegalTransition {
                        id: task.id,
                        from: old.status,
                        to: task.status,
                    });
                }
                let old_keys = keys::index_keys(old);
                for key in old_keys.iter().filter(|k| !new_keys.contains(k)) {
                    batch.delete(key.clone());
                }
                for key in new_keys.iter().filter(|k| !old_keys.contains(k)) {
                    batch.put(key.clone(), Vec::new());
                }
            }
            None => {
                for key in &new_keys {
                    batch.put(key.clone(), Vec::new());
                }
            }
        }
        batch.put(keys::task_key(task.id), serde_json::to_vec(task)?);
        commit(batch)?;

        debug!(task_id = %task.id, status = %task.status, "task record written");
        Ok(())
    }

    /// Removes the record and all of its index entries. Returns the removed task.
    pub fn delete(&self, id: TaskId) -> Result<Task> {
        let _guard = self.lock()?;
        let task = self.get(id)?;

        let mut batch = WriteBatch::new();
        batch.delete(keys::task_key(id));
        for key in keys::index_keys(&task) {
            batch.delete(key);
        }
        self.kv.write(batch)?;

        debug!(task_id = %id, "task record deleted");
        Ok(task)
    }

    // --- counters & params -------------------------------------------------

    /// The id the next `create` will assign. Starts at 1.
    pub fn next_id(&self) -> Result<u64> {
        match self.kv.get(NEXT_ID_KEY)? {
            Some(raw) => {
                let bytes: [u8; 8] = raw
                    .as_slice()
                    .try_into()
                    .map_err(|_| StoreError::Corrupt("next id counter is not 8 bytes".into()))?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(1),
        }
    }

    pub fn set_next_id(&self, next: u64) -> Result<()> {
        self.kv.set(NEXT_ID_KEY, &next.to_be_bytes())
    }

    pub fn stored_params(&self) -> Result<Option<Params>> {
        match self.kv.get(PARAMS_KEY)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Stored params, or the defaults when none were ever written.
    pub fn params(&self) -> Result<Params> {
        Ok(self.stored_params()?.unwrap_or_default())
    }

    pub fn set_params(&self, params: &Params) -> Result<()> {
        self.kv.set(PARAMS_KEY, &serde_json::to_vec(params)?)
    }

    // --- iteration ---------------------------------------------------------

    /// One page of task ids in `index` order.
    pub fn iterate(&self, index: &TaskIndex, page: &PageRequest) -> Result<Page<TaskId>> {
        let prefix = index.prefix();
        let limit = page.effective_limit();
        let range = ScanRange {
            start_after: page.decode_cursor(&prefix)?,
            prefix,
            limit: Some(limit.saturating_add(1)),
            reverse: page.reverse,
        };

        let mut entries = self.kv.scan(&range)?;
        let has_more = entries.len() > limit;
        entries.truncate(limit);

        let next_cursor = match entries.last() {
            Some((key, _)) if has_more => Some(hex::encode(key)),
            _ => None,
        };
        let items = entries
            .iter()
            .map(|(key, _)| keys::id_from_index_key(key))
            .collect::<Result<Vec<_>>>()?;
        Ok(Page { items, next_cursor })
    }

    /// Like [`TaskStore::iterate`] but loads each record.
    pub fn tasks(&self, index: &TaskIndex, page: &PageRequest) -> Result<Page<Task>> {
        let ids = self.iterate(index, page)?;
        let items = ids
            .items
            .iter()
            .map(|id| self.get(*id))
            .collect::<Result<Vec<_>>>()?;
        Ok(Page {
            items,
            next_cursor: ids.next_cursor,
        })
    }

    /// Every id in `status`, ascending by `(scheduled_time, id)`.
    pub fn ids_by_status(&self, status: TaskStatus) -> Result<Vec<TaskId>> {
        self.kv
            .scan(&ScanRange::prefix(keys::status_time_prefix(status)))?
            .iter()
            .map(|(key, _)| keys::id_from_index_key(key))
            .collect()
    }

    /// Ids in `status` with `scheduled_time <= until`, ascending by
    /// `(scheduled_time, id)`. Only the matching part of the index is read.
    pub fn ids_scheduled_until(&self, status: TaskStatus, until: Timestamp) -> Result<Vec<TaskId>> {
        let range = ScanRange::prefix(keys::status_time_prefix(status))
            .start_after(keys::status_time_upper(status, until))
            .reverse(true);
        let mut ids = self
            .kv
            .scan(&range)?
            .iter()
            .map(|(key, _)| keys::id_from_index_key(key))
            .collect::<Result<Vec<_>>>()?;
        ids.reverse();
        Ok(ids)
    }

    /// Pending tasks whose `scheduled_time <= now`.
    pub fn due_ids(&self, now: Timestamp) -> Result<Vec<TaskId>> {
        self.ids_scheduled_until(TaskStatus::Pending, now)
    }

    /// Every record in id order.
    pub fn all_tasks(&self) -> Result<Vec<Task>> {
        self.kv
            .scan(&ScanRange::prefix(keys::task_prefix()))?
            .iter()
            .map(|(_, raw)| serde_json::from_slice(raw).map_err(StoreError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::kv::MemoryKv;
    use crate::sqlite::SqliteKv;
    use crontask_core::{Coin, Operation};

    const ALICE: &str = "dys1qypqxpq9qcrsszg2";
    const BOB: &str = "dys1pzry9x8gf2tvdw0s";

    fn store() -> TaskStore {
        TaskStore::new(Arc::new(MemoryKv::new()))
    }

    fn draft(creator: &str, scheduled: Timestamp, fee: u128) -> impl FnOnce(TaskId) -> Task {
        let creator = Address::parse(creator).unwrap();
        move |id| Task {
            id,
            creator,
            scheduled_time: scheduled,
            expiry_time: scheduled + 100,
            cost_limit: 10,
            cost_price: Task::price_for(&Coin::new("dys", fee), 10),
            cost_fee: Coin::new("dys", fee),
            operations: vec![Operation::new("state.put", serde_json::json!({"key": "k"}))],
            results: vec![],
            status: TaskStatus::Pending,
            error_log: String::new(),
            creation_time: 0,
            execution_time: None,
            cost_used: 0,
        }
    }

    /// Index scan for `index` must equal a filtered primary scan, in order.
    fn assert_index_consistent(store: &TaskStore) {
        let all = store.all_tasks().unwrap();
        for status in TaskStatus::ALL {
            let mut expected: Vec<_> = all.iter().filter(|t| t.status == status).collect();

            expected.sort_by_key(|t| (t.scheduled_time, t.id));
            let by_time: Vec<TaskId> = expected.iter().map(|t| t.id).collect();
            assert_eq!(store.ids_by_status(status).unwrap(), by_time, "time index {status}");

            expected.sort_by_key(|t| (t.cost_price.amount, t.id));
            let by_price: Vec<TaskId> = expected.iter().map(|t| t.id).collect();
            let page = store
                .iterate(&TaskIndex::StatusPrice(status), &PageRequest::first(1_000))
                .unwrap();
            assert_eq!(page.items, by_price, "price index {status}");
        }
        let creators: BTreeSet<_> = all.iter().map(|t| t.creator.clone()).collect();
        for creator in creators {
            let expected: Vec<TaskId> = all
                .iter()
                .filter(|t| t.creator == creator)
                .map(|t| t.id)
                .collect();
            let page = store
                .iterate(&TaskIndex::Creator(creator), &PageRequest::first(1_000))
                .unwrap();
            assert_eq!(page.items, expected);
        }
        // Exactly three index entries per task, nothing stale.
        let index_entries = [0xA1u8, 0xA2, 0xA3]
            .iter()
            .map(|p| store.kv().scan(&ScanRange::prefix(vec![*p])).unwrap().len())
            .sum::<usize>();
        assert_eq!(index_entries, all.len() * 3);
    }

    #[test]
    fn ids_are_sequential_from_one() {
        let store = store();
        let a = store.create(draft(ALICE, 100, 100)).unwrap();
        let b = store.create(draft(ALICE, 100, 100)).unwrap();
        assert_eq!(a.id, TaskId(1));
        assert_eq!(b.id, TaskId(2));
        assert_eq!(store.next_id().unwrap(), 3);
        assert_eq!(store.get(TaskId(2)).unwrap(), b);
    }

    #[test]
    fn missing_task_is_not_found() {
        let err = store().get(TaskId(42)).unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn status_change_moves_index_entries() {
        let store = store();
        let mut t = store.create(draft(ALICE, 100, 100)).unwrap();
        store.create(draft(BOB, 50, 300)).unwrap();
        assert_index_consistent(&store);

        t.transition(TaskStatus::Done).unwrap();
        store.put(&t).unwrap();
        assert_eq!(store.ids_by_status(TaskStatus::Done).unwrap(), vec![t.id]);
        assert_eq!(store.ids_by_status(TaskStatus::Pending).unwrap(), vec![TaskId(2)]);
        assert_index_consistent(&store);
    }

    #[test]
    fn terminal_records_are_frozen() {
        let store = store();
        let mut t = store.create(draft(ALICE, 100, 100)).unwrap();
        t.status = TaskStatus::Expired;
        store.put(&t).unwrap();

        // Rewriting in the same status is allowed.
        t.error_log = "again".into();
        store.put(&t).unwrap();

        t.status = TaskStatus::Pending;
        let err = store.put(&t).unwrap_err();
        assert_eq!(err.code(), "ILLEGAL_TRANSITION");
        assert_eq!(store.get(t.id).unwrap().status, TaskStatus::Expired);
        assert_index_consistent(&store);
    }

    #[test]
    fn delete_removes_every_entry() {
        let store = store();
        let t = store.create(draft(ALICE, 100, 100)).unwrap();
        store.create(draft(ALICE, 200, 100)).unwrap();
        let removed = store.delete(t.id).unwrap();
        assert_eq!(removed.id, t.id);
        assert!(store.find(t.id).unwrap().is_none());
        assert!(store.delete(t.id).is_err());
        assert_index_consistent(&store);
    }

    #[test]
    fn due_ids_stop_at_now() {
        let store = store();
        for ts in [30, 10, 20, 40, 20] {
            store.create(draft(ALICE, ts, 100)).unwrap();
        }
        let due = store.due_ids(20).unwrap();
        // (10,#2) (20,#3) (20,#5)
        assert_eq!(due, vec![TaskId(2), TaskId(3), TaskId(5)]);
        assert!(store.due_ids(9).unwrap().is_empty());
        assert_eq!(store.due_ids(i64::MAX).unwrap().len(), 5);
    }

    #[test]
    fn pagination_walks_the_whole_index() {
        let store = store();
        for i in 0..7 {
            store.create(draft(BOB, 100 + i, 100)).unwrap();
        }
        let index = TaskIndex::StatusTime(TaskStatus::Pending);
        let mut seen = Vec::new();
        let mut page = PageRequest::first(3);
        loop {
            let res = store.iterate(&index, &page).unwrap();
            seen.extend(res.items);
            match res.next_cursor {
                Some(c) => page = PageRequest::after(c, 3),
                None => break,
            }
        }
        assert_eq!(seen, (1..=7).map(TaskId).collect::<Vec<_>>());

        let rev = store
            .iterate(
                &index,
                &PageRequest {
                    reverse: true,
                    limit: 2,
                    cursor: None,
                },
            )
            .unwrap();
        assert_eq!(rev.items, vec![TaskId(7), TaskId(6)]);
        assert!(rev.next_cursor.is_some());
    }

    #[test]
    fn cursor_from_other_index_is_rejected() {
        let store = store();
        store.create(draft(BOB, 100, 100)).unwrap();
        let cursor = hex::encode(keys::task_key(TaskId(1)));
        let err = store
            .iterate(
                &TaskIndex::StatusPrice(TaskStatus::Pending),
                &PageRequest::after(cursor, 10),
            )
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_CURSOR");
    }

    #[test]
    fn params_default_until_written() {
        let store = store();
        assert_eq!(store.params().unwrap(), Params::default());
        assert!(store.stored_params().unwrap().is_none());
        let p = Params {
            cost_budget_per_cycle: 42,
            ..Params::default()
        };
        store.set_params(&p).unwrap();
        assert_eq!(store.params().unwrap(), p);
    }

    #[test]
    fn sqlite_backend_keeps_indexes_consistent() {
        let store = TaskStore::new(Arc::new(SqliteKv::open_in_memory().unwrap()));
        for (i, who) in [ALICE, BOB, ALICE, BOB].iter().enumerate() {
            store
                .create(draft(who, -50 + i as i64 * 40, 1_000 - i as u128 * 100))
                .unwrap();
        }
        let mut t = store.get(TaskId(3)).unwrap();
        t.transition(TaskStatus::Failed).unwrap();
        store.put(&t).unwrap();
        store.delete(TaskId(1)).unwrap();
        assert_index_consistent(&store);
    }
}
