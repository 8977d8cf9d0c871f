use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::info;

use crontask_core::Timestamp;

use crate::driver::Scheduler;

/// Source of the block time handed to each tick.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time in whole UTC seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now().timestamp()
    }
}

/// A clock that only moves when told to. Lets hosts and tests drive ticks
/// at exact timestamps.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Drives [`Scheduler::tick`] on a fixed interval until shutdown.
pub struct SchedulerEngine {
    scheduler: Arc<Scheduler>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl SchedulerEngine {
    pub fn new(scheduler: Arc<Scheduler>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            scheduler,
            clock,
            interval,
        }
    }

    /// Main event loop. Ticks every `interval` until `shutdown` broadcasts `true`.
    ///
    /// A tick runs to completion before the next one starts; missed intervals
    /// are skipped rather than burst.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.interval.as_millis() as u64, "scheduler engine started");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.scheduler.tick(self.clock.now());
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::Ledger;
    use crate::events::{EventSink, TaskEvent};
    use crate::executor::ExecutionEngine;
    use crate::ops::register_builtin;
    use crate::router::OperationRouter;
    use crontask_core::{Address, Coin, CostSchedule, Operation, Task, TaskId, TaskStatus};
    use crontask_store::{MemoryKv, StateRoot};
    use tokio::sync::mpsc;

    #[test]
    fn manual_clock_moves_on_request() {
        let clock = ManualClock::new(100);
        clock.advance(5);
        assert_eq!(clock.now(), 105);
        clock.set(7);
        assert_eq!(clock.now(), 7);
    }

    #[tokio::test]
    async fn run_loop_ticks_until_shutdown() {
        let root = Arc::new(StateRoot::new(Arc::new(MemoryKv::new())));
        let store = root.task_store();
        let ledger = Arc::new(Ledger::new(root.state()));
        ledger.mint("dys1qypqxpq9qcrsszg2", &Coin::new("dys", 10)).unwrap();
        let router = OperationRouter::new();
        register_builtin(&router);

        let id = store
            .create(|id| Task {
                id,
                creator: Address::parse("dys1qypqxpq9qcrsszg2").unwrap(),
                scheduled_time: 10,
                expiry_time: 20,
                cost_limit: 1_000_000,
                cost_fee: Coin::new("dys", 10),
                cost_price: Coin::new("dys", 0),
                operations: vec![Operation::new(
                    "state.put",
                    serde_json::json!({"key": "k", "value": true}),
                )],
                results: vec![],
                status: TaskStatus::Pending,
                error_log: String::new(),
                creation_time: 0,
                execution_time: None,
                cost_used: 0,
            })
            .unwrap()
            .id;

        let (tx, mut rx) = mpsc::channel(16);
        let scheduler = Arc::new(Scheduler::new(
            root,
            ledger,
            ExecutionEngine::new(Arc::new(router), CostSchedule::default()),
            EventSink::new(tx),
        ));
        let engine = SchedulerEngine::new(
            scheduler,
            Arc::new(ManualClock::new(10)),
            Duration::from_millis(5),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(engine.run(shutdown_rx));

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            TaskEvent::Executed {
                task_id: id,
                status: TaskStatus::Done,
                cost_used: store.get(id).unwrap().cost_used,
            }
        );

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.get(TaskId(1)).unwrap().status, TaskStatus::Done);
    }
}
