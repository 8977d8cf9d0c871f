use crontask_core::{Address, CostSchedule, Task, TaskId, Timestamp};
use crontask_store::{CacheKv, KvStore, ScanRange, WriteBatch};

use crate::error::OperationError;

/// Monotonic resource counter for one execution attempt.
///
/// Once a charge would exceed the limit the meter pins `used` at the limit
/// and every later charge fails as well.
#[derive(Debug, Clone)]
pub struct CostMeter {
    limit: u64,
    used: u64,
    exceeded: bool,
}

impl CostMeter {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: 0,
            exceeded: false,
        }
    }

    pub fn consume(&mut self, amount: u64, descriptor: &str) -> Result<(), OperationError> {
        let total = self.used.saturating_add(amount);
        if self.exceeded || total > self.limit {
            self.exceeded = true;
            self.used = self.limit;
            return Err(OperationError::OutOfCost {
                used: total,
                limit: self.limit,
                descriptor: descriptor.to_string(),
            });
        }
        self.used = total;
        Ok(())
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn remaining(&self) -> u64 {
        self.limit - self.used
    }

    pub fn exceeded(&self) -> bool {
        self.exceeded
    }
}

/// The isolated, metered view of application state handed to operation
/// handlers. Writes are buffered; the executor decides whether they are
/// committed or dropped.
pub struct ExecScope<'a> {
    cache: CacheKv<'a>,
    meter: CostMeter,
    costs: &'a CostSchedule,
    task_id: TaskId,
    creator: &'a Address,
    now: Timestamp,
}

impl<'a> ExecScope<'a> {
    pub fn new(
        state: &'a dyn KvStore,
        costs: &'a CostSchedule,
        task: &'a Task,
        now: Timestamp,
    ) -> Self {
        Self {
            cache: CacheKv::new(state),
            meter: CostMeter::new(task.cost_limit),
            costs,
            task_id: task.id,
            creator: &task.creator,
            now,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn creator(&self) -> &Address {
        self.creator
    }

    /// Block time of the tick running this task.
    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn costs(&self) -> &CostSchedule {
        self.costs
    }

    pub fn meter(&self) -> &CostMeter {
        &self.meter
    }

    pub fn consume(&mut self, amount: u64, descriptor: &str) -> Result<(), OperationError> {
        self.meter.consume(amount, descriptor)
    }

    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, OperationError> {
        let value = self.cache.get(key)?;
        let len = value.as_ref().map_or(0, Vec::len);
        self.meter.consume(self.costs.read_cost(len), "read")?;
        Ok(value)
    }

    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), OperationError> {
        self.meter
            .consume(self.costs.write_cost(key.len(), value.len()), "write")?;
        self.cache.set(key, value)?;
        Ok(())
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<(), OperationError> {
        self.meter.consume(self.costs.delete_cost(), "delete")?;
        self.cache.delete(key)?;
        Ok(())
    }

    pub fn scan(&mut self, range: &ScanRange) -> Result<Vec<(Vec<u8>, Vec<u8>)>, OperationError> {
        let entries = self.cache.scan(range)?;
        self.meter
            .consume(self.costs.iter_cost(entries.len()), "iterate")?;
        Ok(entries)
    }

    /// Buffered writes and the cost consumed so far.
    pub fn finish(self) -> Result<(WriteBatch, u64), OperationError> {
        let used = self.meter.used();
        Ok((self.cache.into_batch()?, used))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crontask_core::{Coin, Operation, TaskStatus};
    use crontask_store::MemoryKv;

    fn task(limit: u64) -> Task {
        Task {
            id: TaskId(1),
            creator: Address::parse("dys1qypqxpq9qcrsszg2").unwrap(),
            scheduled_time: 10,
            expiry_time: 20,
            cost_limit: limit,
            cost_fee: Coin::new("dys", 100),
            cost_price: Coin::new("dys", 1),
            operations: vec![Operation::new("state.put", serde_json::Value::Null)],
            results: vec![],
            status: TaskStatus::Pending,
            error_log: String::new(),
            creation_time: 0,
            execution_time: None,
            cost_used: 0,
        }
    }

    #[test]
    fn meter_is_monotonic_and_sticky() {
        let mut m = CostMeter::new(10);
        m.consume(4, "a").unwrap();
        assert_eq!(m.remaining(), 6);
        assert!(m.consume(7, "b").is_err());
        assert!(m.exceeded());
        assert_eq!(m.used(), 10);
        // Even a zero charge fails after overflow.
        assert!(m.consume(0, "c").is_err());
    }

    #[test]
    fn meter_allows_exact_limit() {
        let mut m = CostMeter::new(10);
        m.consume(10, "all").unwrap();
        assert!(!m.exceeded());
        assert!(m.consume(1, "more").is_err());
    }

    #[test]
    fn scope_charges_and_buffers() {
        let state = MemoryKv::new();
        let costs = CostSchedule::default();
        let t = task(1_000_000);
        let mut scope = ExecScope::new(&state, &costs, &t, 15);

        scope.set(b"k", b"v").unwrap();
        assert_eq!(scope.meter().used(), costs.write_cost(1, 1));
        assert_eq!(scope.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(state.get(b"k").unwrap(), None);

        let (batch, used) = scope.finish().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(used, costs.write_cost(1, 1) + costs.read_cost(1));
    }

    #[test]
    fn scope_refuses_writes_past_limit() {
        let state = MemoryKv::new();
        let costs = CostSchedule::default();
        let t = task(10);
        let mut scope = ExecScope::new(&state, &costs, &t, 15);
        let err = scope.set(b"k", b"v").unwrap_err();
        assert!(matches!(err, OperationError::OutOfCost { .. }));
    }
}
