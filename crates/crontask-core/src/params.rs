use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const DEFAULT_COST_BUDGET_PER_CYCLE: u64 = 10_000_000;
pub const DEFAULT_EXPIRY_WINDOW_SECS: i64 = 86_400;
pub const DEFAULT_MAX_SCHEDULED_HORIZON_SECS: i64 = 86_400;
pub const DEFAULT_CLEANUP_AFTER_SECS: i64 = 86_400;
pub const DEFAULT_FEE_DENOM: &str = "dys";

/// Tunable limits read by every tick and by task creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    /// Upper bound for a single task's `cost_limit` and for the sum of
    /// `cost_used` within one tick.
    #[serde(default = "default_cost_budget")]
    pub cost_budget_per_cycle: u64,
    /// Added to `scheduled_time` when a task is created without an expiry.
    #[serde(default = "default_expiry_window")]
    pub default_expiry_window: i64,
    /// How far past `now` a task may be scheduled.
    #[serde(default = "default_horizon")]
    pub max_scheduled_horizon: i64,
    /// Terminal tasks older than this are removed; 0 keeps them forever.
    #[serde(default = "default_cleanup_after")]
    pub cleanup_after: i64,
    #[serde(default = "default_fee_denom")]
    pub fee_denom: String,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            cost_budget_per_cycle: DEFAULT_COST_BUDGET_PER_CYCLE,
            default_expiry_window: DEFAULT_EXPIRY_WINDOW_SECS,
            max_scheduled_horizon: DEFAULT_MAX_SCHEDULED_HORIZON_SECS,
            cleanup_after: DEFAULT_CLEANUP_AFTER_SECS,
            fee_denom: DEFAULT_FEE_DENOM.to_string(),
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<()> {
        if self.cost_budget_per_cycle == 0 {
            return Err(CoreError::InvalidParams(
                "cost budget per cycle must be positive".into(),
            ));
        }
        if self.default_expiry_window <= 0 {
            return Err(CoreError::InvalidParams(format!(
                "default expiry window must be positive: {}",
                self.default_expiry_window
            )));
        }
        if self.max_scheduled_horizon <= 0 {
            return Err(CoreError::InvalidParams(format!(
                "max scheduled horizon must be positive: {}",
                self.max_scheduled_horizon
            )));
        }
        if self.cleanup_after < 0 {
            return Err(CoreError::InvalidParams(format!(
                "cleanup_after cannot be negative: {}",
                self.cleanup_after
            )));
        }
        if self.fee_denom.is_empty() {
            return Err(CoreError::InvalidParams("fee denom cannot be empty".into()));
        }
        Ok(())
    }
}

fn default_cost_budget() -> u64 {
    DEFAULT_COST_BUDGET_PER_CYCLE
}
fn default_expiry_window() -> i64 {
    DEFAULT_EXPIRY_WINDOW_SECS
}
fn default_horizon() -> i64 {
    DEFAULT_MAX_SCHEDULED_HORIZON_SECS
}
fn default_cleanup_after() -> i64 {
    DEFAULT_CLEANUP_AFTER_SECS
}
fn default_fee_denom() -> String {
    DEFAULT_FEE_DENOM.to_string()
}
