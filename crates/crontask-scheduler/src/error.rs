use thiserror::Error;

use crontask_core::{CoreError, TaskId, Timestamp};
use crontask_store::StoreError;

/// Errors returned to callers of the task lifecycle and query APIs.
///
/// Validation variants are raised before anything is written.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The creator or requester is not a well-formed address.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// A time spec is neither `+duration`, a Unix timestamp nor RFC 3339.
    #[error("Invalid time format: {0}")]
    InvalidTimeFormat(String),

    /// The resolved scheduled time is not in the future.
    #[error("Scheduled time {scheduled} is not after current time {now}")]
    PastSchedule { scheduled: Timestamp, now: Timestamp },

    /// The scheduled time is later than `now + max_scheduled_horizon`.
    #[error("Scheduled time {scheduled} is beyond the allowed horizon {max}")]
    HorizonExceeded { scheduled: Timestamp, max: Timestamp },

    /// The expiry time is not after the scheduled time.
    #[error("Expiry time {expiry} must be after scheduled time {scheduled}")]
    InvalidExpiry { scheduled: Timestamp, expiry: Timestamp },

    /// The cost limit is zero or above `cost_budget_per_cycle`.
    #[error("Cost limit {limit} must be in 1..={max}")]
    InvalidCostLimit { limit: u64, max: u64 },

    /// The fee is zero or not in the configured denomination.
    #[error("Invalid fee: {0}")]
    InvalidFee(String),

    /// The operation list is empty.
    #[error("Task must contain at least one operation")]
    EmptyOperationList,

    /// No task with the given id exists in the store.
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    /// The caller may not delete this task or update params.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Proposed params failed validation.
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// A genesis state failed validation.
    #[error("Invalid genesis state: {0}")]
    InvalidGenesis(String),

    /// Underlying task store error.
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl TaskError {
    /// Short, stable error code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            TaskError::InvalidAddress(_) => "INVALID_ADDRESS",
            TaskError::InvalidTimeFormat(_) => "INVALID_TIME_FORMAT",
            TaskError::PastSchedule { .. } => "PAST_SCHEDULE",
            TaskError::HorizonExceeded { .. } => "HORIZON_EXCEEDED",
            TaskError::InvalidExpiry { .. } => "INVALID_EXPIRY",
            TaskError::InvalidCostLimit { .. } => "INVALID_COST_LIMIT",
            TaskError::InvalidFee(_) => "INVALID_FEE",
            TaskError::EmptyOperationList => "EMPTY_OPERATION_LIST",
            TaskError::NotFound(_) => "NOT_FOUND",
            TaskError::Unauthorized(_) => "UNAUTHORIZED",
            TaskError::InvalidParams(_) => "INVALID_PARAMS",
            TaskError::InvalidGenesis(_) => "INVALID_GENESIS",
            TaskError::Store(_) => "STORE_ERROR",
        }
    }
}

impl From<StoreError> for TaskError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => TaskError::NotFound(id),
            other => TaskError::Store(other),
        }
    }
}

impl From<CoreError> for TaskError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidAddress(m) => TaskError::InvalidAddress(m),
            CoreError::InvalidTimeFormat(m) => TaskError::InvalidTimeFormat(m),
            CoreError::InvalidParams(m) => TaskError::InvalidParams(m),
            CoreError::InvalidGenesis(m) => TaskError::InvalidGenesis(m),
            other => TaskError::Store(StoreError::Core(other)),
        }
    }
}

pub type Result<T> = std::result::Result<T, TaskError>;

/// Why a single operation did not complete. Always absorbed into the task's
/// `error_log`, never returned across a tick.
#[derive(Debug, Error)]
pub enum OperationError {
    /// No handler is registered for the operation kind.
    #[error("unsupported operation kind: {0}")]
    Unsupported(String),

    /// The task's cost limit was exceeded.
    #[error("out of cost: used {used} of {limit} ({descriptor})")]
    OutOfCost {
        used: u64,
        limit: u64,
        descriptor: String,
    },

    /// The payload does not match what the handler expects.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The handler refused a well-formed request.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The handler panicked; the message is the panic payload.
    #[error("panicked: {0}")]
    Panicked(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Failure to move a task's fee from its creator.
#[derive(Debug, Error)]
pub enum FeeError {
    /// The payer's balance is below the amount.
    #[error("insufficient funds: {account} has {available}{denom}, needs {needed}{denom}")]
    InsufficientFunds {
        account: String,
        denom: String,
        needed: u128,
        available: u128,
    },

    /// Zero amount or a balance overflow.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
