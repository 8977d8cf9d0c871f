use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crontask_core::{Params, Task, TaskId, TaskStatus, Timestamp};
use crontask_store::{CacheKv, StateRoot, TaskStore, WriteBatch};

use crate::bank::FeeCollector;
use crate::cleanup::Cleaner;
use crate::events::{EventSink, TaskEvent};
use crate::executor::{ExecOutcome, ExecutionEngine};
use crate::expiry::ExpiryChecker;

/// Summary of one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub now: Timestamp,
    pub expired: Vec<TaskId>,
    pub done: Vec<TaskId>,
    pub failed: Vec<TaskId>,
    /// Due but left pending because the per-tick cost budget was reached.
    pub deferred: Vec<TaskId>,
    /// Skipped because of a store error. Nothing of the attempt was
    /// committed, so the task is retried next tick.
    pub skipped: Vec<TaskId>,
    pub removed: Vec<TaskId>,
    pub cost_consumed: u64,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.expired.is_empty()
            && self.done.is_empty()
            && self.failed.is_empty()
            && self.deferred.is_empty()
            && self.skipped.is_empty()
            && self.removed.is_empty()
    }
}

/// Orchestrates one execution cycle: expiry, due-task execution, cleanup.
///
/// `tick` is synchronous and processes tasks strictly one after another in
/// `(scheduled_time, id)` order, so replaying a tick over the same state
/// gives the same result.
///
/// An executed task's fee, its operation effects and its final record are
/// committed through [`StateRoot::commit`] as one batch, so a task is charged
/// and applied exactly once or not at all.
pub struct Scheduler {
    root: Arc<StateRoot>,
    store: Arc<TaskStore>,
    fees: Arc<dyn FeeCollector>,
    engine: ExecutionEngine,
    expiry: ExpiryChecker,
    cleaner: Cleaner,
    events: EventSink,
}

impl Scheduler {
    pub fn new(
        root: Arc<StateRoot>,
        fees: Arc<dyn FeeCollector>,
        engine: ExecutionEngine,
        events: EventSink,
    ) -> Self {
        let store = root.task_store();
        Self {
            expiry: ExpiryChecker::new(store.clone()),
            cleaner: Cleaner::new(store.clone()),
            root,
            store,
            fees,
            engine,
            events,
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Run one cycle at block time `now`. Never fails: every error is
    /// absorbed into task state or the log.
    pub fn tick(&self, now: Timestamp) -> TickReport {
        let mut report = TickReport {
            now,
            ..Default::default()
        };

        let params = match self.store.params() {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "cannot read params, using defaults");
                Params::default()
            }
        };

        report.expired = self.expiry.run(now);
        for id in &report.expired {
            self.events.emit(TaskEvent::Expired { task_id: *id });
        }

        let due = match self.store.due_ids(now) {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "due task scan failed");
                Vec::new()
            }
        };

        for (pos, id) in due.iter().enumerate() {
            let task = match self.store.get(*id) {
                Ok(t) => t,
                Err(e) => {
                    error!(task_id = %id, error = %e, "cannot load due task, skipping");
                    report.skipped.push(*id);
                    continue;
                }
            };
            if !task.is_due(now) {
                continue;
            }

            // The first task of a tick always runs so a single large task
            // cannot starve forever.
            if report.cost_consumed > 0
                && report.cost_consumed.saturating_add(task.cost_limit) > params.cost_budget_per_cycle
            {
                report.deferred = due[pos..].to_vec();
                warn!(
                    deferred = report.deferred.len(),
                    consumed = report.cost_consumed,
                    budget = params.cost_budget_per_cycle,
                    "tick cost budget reached, deferring remaining due tasks"
                );
                break;
            }

            let (task, state_writes) = self.run_task(task, now);
            report.cost_consumed = report.cost_consumed.saturating_add(task.cost_used);

            match self.root.commit(&task, state_writes) {
                Ok(()) => {
                    match task.status {
                        TaskStatus::Done => report.done.push(task.id),
                        _ => report.failed.push(task.id),
                    }
                    self.events.emit(TaskEvent::Executed {
                        task_id: task.id,
                        status: task.status,
                        cost_used: task.cost_used,
                    });
                }
                Err(e) => {
                    error!(task_id = %task.id, error = %e, "failed to commit task result, attempt discarded");
                    report.skipped.push(task.id);
                }
            }
        }

        report.removed = self.cleaner.run(now, params.cleanup_after);
        for id in &report.removed {
            self.events.emit(TaskEvent::Removed { task_id: *id });
        }

        if report.is_idle() {
            debug!(now, "tick idle");
        } else {
            info!(
                now,
                expired = report.expired.len(),
                done = report.done.len(),
                failed = report.failed.len(),
                deferred = report.deferred.len(),
                removed = report.removed.len(),
                cost = report.cost_consumed,
                "tick complete"
            );
        }
        report
    }

    /// Collect the fee and execute against a write buffer over the state.
    /// Returns the task in its final status and the state writes to commit
    /// with it: fee and effects on success, the fee alone on failure.
    fn run_task(&self, mut task: Task, now: Timestamp) -> (Task, WriteBatch) {
        task.execution_time = Some(now);
        task.error_log.clear();
        task.results.clear();
        task.cost_used = 0;

        let state = self.root.state();
        let staged = CacheKv::new(state.as_ref());
        if let Err(e) = self.fees.collect(&staged, &task.creator, &task.cost_fee) {
            warn!(task_id = %task.id, error = %e, "fee collection failed");
            return (fail(task, format!("fee collection failed: {e}")), WriteBatch::new());
        }

        let execution = self.engine.execute(&task, &staged, now);
        task.cost_used = execution.cost_used;
        let error_log = execution.error_log();

        let mut writes = match staged.into_batch() {
            Ok(batch) => batch,
            Err(e) => {
                error!(task_id = %task.id, error = %e, "cannot read staged fee transfer");
                return (fail(task, format!("fee collection failed: {e}")), WriteBatch::new());
            }
        };

        match execution.outcome {
            ExecOutcome::Success { results, writes: effects } => {
                writes.extend(effects);
                task.results = results;
                if let Err(e) = task.transition(TaskStatus::Done) {
                    error!(task_id = %task.id, error = %e, "unexpected status");
                }
                info!(task_id = %task.id, cost_used = task.cost_used, "task executed");
                (task, writes)
            }
            ExecOutcome::Failure { .. } => {
                let log = error_log.unwrap_or_default();
                info!(task_id = %task.id, cost_used = task.cost_used, error = %log, "task failed");
                (fail(task, log), writes)
            }
        }
    }
}

fn fail(mut task: Task, error_log: String) -> Task {
    if let Err(e) = task.transition(TaskStatus::Failed) {
        error!(task_id = %task.id, error = %e, "unexpected status");
    }
    task.results.clear();
    task.error_log = error_log;
    task
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::bank::{Ledger, FEE_COLLECTOR_ACCOUNT};
    use crate::error::OperationError;
    use crate::ops::{data_key, register_builtin};
    use crate::router::OperationRouter;
    use crate::scope::ExecScope;
    use crontask_core::{Address, Coin, CostSchedule, Operation};
    use crontask_store::{keys, KvStore, MemoryKv, ScanRange, StoreError};
    use serde_json::{json, Value};

    const ALICE: &str = "dys1qypqxpq9qcrsszg2";

    /// In-memory store whose writes can be switched off.
    struct FlakyKv {
        inner: MemoryKv,
        fail_writes: AtomicBool,
    }

    impl FlakyKv {
        fn new() -> Self {
            Self {
                inner: MemoryKv::new(),
                fail_writes: AtomicBool::new(false),
            }
        }

        fn fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }
    }

    impl KvStore for FlakyKv {
        fn get(&self, key: &[u8]) -> crontask_store::Result<Option<Vec<u8>>> {
            self.inner.get(key)
        }

        fn write(&self, batch: WriteBatch) -> crontask_store::Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Corrupt("disk unavailable".into()));
            }
            self.inner.write(batch)
        }

        fn scan(&self, range: &ScanRange) -> crontask_store::Result<Vec<(Vec<u8>, Vec<u8>)>> {
            self.inner.scan(range)
        }
    }

    struct Harness {
        scheduler: Scheduler,
        store: Arc<TaskStore>,
        state: Arc<dyn KvStore>,
        ledger: Arc<Ledger>,
        kv: Arc<FlakyKv>,
    }

    fn harness(costs: CostSchedule) -> Harness {
        let kv = Arc::new(FlakyKv::new());
        let root = Arc::new(StateRoot::new(kv.clone()));
        let store = root.task_store();
        let state = root.state();
        let ledger = Arc::new(Ledger::new(state.clone()));
        let router = OperationRouter::new();
        register_builtin(&router);
        router.register_fn("panic", |_: &Value, _: &mut ExecScope<'_>| -> Result<Value, OperationError> {
            panic!("bad handler")
        });
        let scheduler = Scheduler::new(
            root,
            ledger.clone(),
            ExecutionEngine::new(Arc::new(router), costs),
            EventSink::disabled(),
        );
        Harness {
            scheduler,
            store,
            state,
            ledger,
            kv,
        }
    }

    fn put_op(key: &str) -> Operation {
        Operation::new("state.put", json!({"key": key, "value": 1}))
    }

    fn add(h: &Harness, scheduled: Timestamp, limit: u64, ops: Vec<Operation>) -> TaskId {
        h.store
            .create(|id| Task {
                id,
                creator: Address::parse(ALICE).unwrap(),
                scheduled_time: scheduled,
                expiry_time: scheduled + 100,
                cost_limit: limit,
                cost_fee: Coin::new("dys", 10),
                cost_price: Task::price_for(&Coin::new("dys", 10), limit),
                operations: ops,
                results: vec![],
                status: TaskStatus::Pending,
                error_log: String::new(),
                creation_time: 0,
                execution_time: None,
                cost_used: 0,
            })
            .unwrap()
            .id
    }

    #[test]
    fn executes_due_tasks_in_time_order() {
        let h = harness(CostSchedule::zero());
        h.ledger.mint(ALICE, &Coin::new("dys", 100)).unwrap();
        let late = add(&h, 20, 10, vec![put_op("late")]);
        let early = add(&h, 10, 10, vec![put_op("early")]);
        let future = add(&h, 99, 10, vec![put_op("future")]);

        let report = h.scheduler.tick(20);
        assert_eq!(report.done, vec![early, late]);
        assert_eq!(h.store.get(future).unwrap().status, TaskStatus::Pending);

        let t = h.store.get(early).unwrap();
        assert_eq!(t.status, TaskStatus::Done);
        assert_eq!(t.execution_time, Some(20));
        assert_eq!(t.results.len(), 1);
        assert!(h.state.get(&data_key("early")).unwrap().is_some());
        assert_eq!(h.ledger.balance(FEE_COLLECTOR_ACCOUNT, "dys").unwrap(), 20);
    }

    #[test]
    fn fee_failure_skips_operations() {
        let h = harness(CostSchedule::zero());
        let id = add(&h, 10, 10, vec![put_op("never")]);
        let report = h.scheduler.tick(10);
        assert_eq!(report.failed, vec![id]);

        let t = h.store.get(id).unwrap();
        assert_eq!(t.status, TaskStatus::Failed);
        assert!(t.error_log.contains("fee collection failed"));
        assert_eq!(t.cost_used, 0);
        assert!(h.state.get(&data_key("never")).unwrap().is_none());
    }

    #[test]
    fn panic_in_one_task_does_not_stop_the_tick() {
        let h = harness(CostSchedule::zero());
        h.ledger.mint(ALICE, &Coin::new("dys", 100)).unwrap();
        let bad = add(
            &h,
            10,
            10,
            vec![put_op("partial"), Operation::new("panic", Value::Null)],
        );
        let good = add(&h, 11, 10, vec![put_op("ok")]);

        let report = h.scheduler.tick(11);
        assert_eq!(report.failed, vec![bad]);
        assert_eq!(report.done, vec![good]);

        let t = h.store.get(bad).unwrap();
        assert!(t.error_log.starts_with("operation at index 1 failed: panicked"));
        assert!(t.results.is_empty());
        assert!(h.state.get(&data_key("partial")).unwrap().is_none());
        assert!(h.state.get(&data_key("ok")).unwrap().is_some());
        // Fee is not refunded on failure.
        assert_eq!(h.ledger.balance(ALICE, "dys").unwrap(), 80);
    }

    #[test]
    fn budget_defers_remaining_tasks() {
        let h = harness(CostSchedule::default());
        h.ledger.mint(ALICE, &Coin::new("dys", 1_000)).unwrap();
        h.store
            .set_params(&Params {
                cost_budget_per_cycle: 10_000,
                ..Params::default()
            })
            .unwrap();
        let a = add(&h, 10, 8_000, vec![put_op("a")]);
        let b = add(&h, 11, 8_000, vec![put_op("b")]);
        let c = add(&h, 12, 8_000, vec![put_op("c")]);

        let report = h.scheduler.tick(12);
        assert_eq!(report.done, vec![a]);
        assert_eq!(report.deferred, vec![b, c]);
        assert!(report.cost_consumed <= 10_000);
        assert_eq!(h.store.get(b).unwrap().status, TaskStatus::Pending);

        let report = h.scheduler.tick(13);
        assert_eq!(report.done, vec![b]);
        assert_eq!(report.deferred, vec![c]);
    }

    #[test]
    fn first_task_runs_even_over_budget() {
        let h = harness(CostSchedule::default());
        h.ledger.mint(ALICE, &Coin::new("dys", 1_000)).unwrap();
        h.store
            .set_params(&Params {
                cost_budget_per_cycle: 100,
                ..Params::default()
            })
            .unwrap();
        let id = add(&h, 10, 50_000, vec![put_op("big")]);
        assert_eq!(h.scheduler.tick(10).done, vec![id]);
    }

    #[test]
    fn cleanup_runs_after_execution() {
        let h = harness(CostSchedule::zero());
        h.ledger.mint(ALICE, &Coin::new("dys", 100)).unwrap();
        h.store
            .set_params(&Params {
                cleanup_after: 50,
                ..Params::default()
            })
            .unwrap();
        let id = add(&h, 10, 10, vec![put_op("x")]);
        h.scheduler.tick(10);
        assert!(h.scheduler.tick(59).removed.is_empty());
        assert_eq!(h.scheduler.tick(60).removed, vec![id]);
        assert!(h.store.find(id).unwrap().is_none());
    }

    #[test]
    fn idle_tick_reports_nothing() {
        let h = harness(CostSchedule::zero());
        let report = h.scheduler.tick(1);
        assert!(report.is_idle());
        assert_eq!(report.now, 1);
    }

    #[test]
    fn failed_commit_charges_nothing_and_runs_once_later() {
        let h = harness(CostSchedule::zero());
        h.ledger.mint(ALICE, &Coin::new("dys", 1_000)).unwrap();
        let id = add(&h, 10, 10, vec![put_op("once")]);

        h.kv.fail_writes(true);
        let report = h.scheduler.tick(10);
        assert_eq!(report.skipped, vec![id]);
        assert!(report.done.is_empty() && report.failed.is_empty());
        assert_eq!(h.store.get(id).unwrap().status, TaskStatus::Pending);
        assert_eq!(h.ledger.balance(ALICE, "dys").unwrap(), 1_000);
        assert_eq!(h.ledger.balance(FEE_COLLECTOR_ACCOUNT, "dys").unwrap(), 0);
        assert!(h.state.get(&data_key("once")).unwrap().is_none());

        h.kv.fail_writes(false);
        assert_eq!(h.scheduler.tick(11).done, vec![id]);
        assert_eq!(h.ledger.balance(ALICE, "dys").unwrap(), 990);
        assert_eq!(h.ledger.balance(FEE_COLLECTOR_ACCOUNT, "dys").unwrap(), 10);
        assert!(h.state.get(&data_key("once")).unwrap().is_some());

        assert!(h.scheduler.tick(12).is_idle());
        assert_eq!(h.ledger.balance(ALICE, "dys").unwrap(), 990);
    }

    #[test]
    fn failed_commit_of_failing_task_keeps_fee() {
        let h = harness(CostSchedule::zero());
        h.ledger.mint(ALICE, &Coin::new("dys", 100)).unwrap();
        let id = add(&h, 10, 10, vec![Operation::new("panic", Value::Null)]);

        h.kv.fail_writes(true);
        assert_eq!(h.scheduler.tick(10).skipped, vec![id]);
        assert_eq!(h.ledger.balance(ALICE, "dys").unwrap(), 100);

        h.kv.fail_writes(false);
        assert_eq!(h.scheduler.tick(11).failed, vec![id]);
        assert_eq!(h.ledger.balance(ALICE, "dys").unwrap(), 90);
        assert_eq!(h.store.get(id).unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn unreadable_record_is_skipped_and_tick_continues() {
        let h = harness(CostSchedule::zero());
        h.ledger.mint(ALICE, &Coin::new("dys", 100)).unwrap();
        let bad = add(&h, 10, 10, vec![put_op("bad")]);
        let good = add(&h, 11, 10, vec![put_op("good")]);
        h.store.kv().set(&keys::task_key(bad), b"not json").unwrap();

        let report = h.scheduler.tick(11);
        assert_eq!(report.skipped, vec![bad]);
        assert_eq!(report.done, vec![good]);
        assert_eq!(
            h.store.kv().get(&keys::task_key(bad)).unwrap(),
            Some(b"not json".to_vec())
        );
        assert!(h.state.get(&data_key("bad")).unwrap().is_none());
        assert_eq!(h.ledger.balance(ALICE, "dys").unwrap(), 90);
    }
}
