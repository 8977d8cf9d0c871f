use serde::{Deserialize, Serialize};

/// Resource units charged for work done inside an execution scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostSchedule {
    /// Charged once per operation before it is dispatched.
    pub op_base: u64,
    pub read_flat: u64,
    pub read_per_byte: u64,
    pub write_flat: u64,
    pub write_per_byte: u64,
    pub delete_flat: u64,
    pub iter_per_item: u64,
}

impl Default for CostSchedule {
    fn default() -> Self {
        Self {
            op_base: 1_000,
            read_flat: 1_000,
            read_per_byte: 3,
            write_flat: 2_000,
            write_per_byte: 30,
            delete_flat: 1_000,
            iter_per_item: 30,
        }
    }
}

impl CostSchedule {
    /// Everything free. Useful when a host wants handlers to meter themselves.
    pub fn zero() -> Self {
        Self {
            op_base: 0,
            read_flat: 0,
            read_per_byte: 0,
            write_flat: 0,
            write_per_byte: 0,
            delete_flat: 0,
            iter_per_item: 0,
        }
    }

    pub fn read_cost(&self, value_len: usize) -> u64 {
        self.read_flat
            .saturating_add(self.read_per_byte.saturating_mul(value_len as u64))
    }

    pub fn write_cost(&self, key_len: usize, value_len: usize) -> u64 {
        let bytes = (key_len as u64).saturating_add(value_len as u64);
        self.write_flat
            .saturating_add(self.write_per_byte.saturating_mul(bytes))
    }

    pub fn delete_cost(&self) -> u64 {
        self.delete_flat
    }

    pub fn iter_cost(&self, items: usize) -> u64 {
        self.iter_per_item.saturating_mul(items as u64)
    }
}
