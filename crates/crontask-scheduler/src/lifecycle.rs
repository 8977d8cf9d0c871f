use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crontask_core::{
    Address, Coin, Operation, Params, Task, TaskId, TaskStatus, TimeSpec, Timestamp,
};
use crontask_store::TaskStore;

use crate::error::{Result, TaskError};
use crate::events::{EventSink, TaskEvent};

/// Input of [`TaskService::create_task`]. Times are unparsed specs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub creator: String,
    /// Absolute timestamp or `+duration` from now.
    pub scheduled_time: String,
    /// Absolute timestamp or `+duration` from `scheduled_time`. Absent or
    /// empty means `scheduled_time + default_expiry_window`.
    #[serde(default)]
    pub expiry_time: Option<String>,
    pub cost_limit: u64,
    pub cost_fee: Coin,
    pub operations: Vec<Operation>,
}

/// Create / delete entry points and parameter updates.
pub struct TaskService {
    store: Arc<TaskStore>,
    authority: Option<Address>,
    events: EventSink,
}

impl TaskService {
    pub fn new(store: Arc<TaskStore>, authority: Option<Address>, events: EventSink) -> Self {
        Self {
            store,
            authority,
            events,
        }
    }

    /// Validate and persist a new task. Nothing is written on error.
    pub fn create_task(&self, req: CreateTaskRequest, now: Timestamp) -> Result<TaskId> {
        let params = self.store.params()?;
        let creator = Address::parse(&req.creator)?;

        let scheduled_time = TimeSpec::parse(&req.scheduled_time)?.resolve(now)?;
        if scheduled_time <= now {
            return Err(TaskError::PastSchedule {
                scheduled: scheduled_time,
                now,
            });
        }
        let horizon = now.saturating_add(params.max_scheduled_horizon);
        if scheduled_time > horizon {
            return Err(TaskError::HorizonExceeded {
                scheduled: scheduled_time,
                max: horizon,
            });
        }

        let expiry_time = match req.expiry_time.as_deref().map(str::trim) {
            None | Some("") => scheduled_time.saturating_add(params.default_expiry_window),
            Some(spec) => TimeSpec::parse(spec)?.resolve(scheduled_time)?,
        };
        if expiry_time <= scheduled_time {
            return Err(TaskError::InvalidExpiry {
                scheduled: scheduled_time,
                expiry: expiry_time,
            });
        }

        if req.cost_limit == 0 || req.cost_limit > params.cost_budget_per_cycle {
            return Err(TaskError::InvalidCostLimit {
                limit: req.cost_limit,
                max: params.cost_budget_per_cycle,
            });
        }

        validate_fee(&req.cost_fee, &params)?;
        let cost_price = Task::price_for(&req.cost_fee, req.cost_limit);

        if req.operations.is_empty() {
            return Err(TaskError::EmptyOperationList);
        }

        let task = self.store.create(|id| Task {
            id,
            creator: creator.clone(),
            scheduled_time,
            expiry_time,
            cost_limit: req.cost_limit,
            cost_fee: req.cost_fee,
            cost_price,
            operations: req.operations,
            results: Vec::new(),
            status: TaskStatus::Pending,
            error_log: String::new(),
            creation_time: now,
            execution_time: None,
            cost_used: 0,
        })?;

        info!(
            task_id = %task.id,
            creator = %task.creator,
            scheduled_time,
            expiry_time,
            cost_limit = task.cost_limit,
            "task created"
        );
        self.events.emit(TaskEvent::Created {
            task_id: task.id,
            creator,
            scheduled_time,
        });
        Ok(task.id)
    }

    /// Remove a task in any status. Only its creator may do so.
    pub fn delete_task(&self, id: TaskId, requester: &str) -> Result<()> {
        let task = self.store.get(id)?;
        let requester = Address::parse(requester)?;
        if task.creator != requester {
            return Err(TaskError::Unauthorized(format!(
                "{requester} is not the creator of task {id}"
            )));
        }
        self.store.delete(id)?;

        info!(task_id = %id, status = %task.status, "task deleted");
        self.events.emit(TaskEvent::Deleted {
            task_id: id,
            requester,
        });
        Ok(())
    }

    pub fn params(&self) -> Result<Params> {
        Ok(self.store.params()?)
    }

    /// Replace the params. Restricted to the configured authority.
    pub fn set_params(&self, caller: &str, params: Params) -> Result<()> {
        let caller = Address::parse(caller)?;
        match &self.authority {
            Some(authority) if *authority == caller => {}
            _ => {
                return Err(TaskError::Unauthorized(format!(
                    "{caller} may not update params"
                )))
            }
        }
        params.validate()?;
        self.store.set_params(&params)?;

        info!(%caller, budget = params.cost_budget_per_cycle, "params updated");
        self.events.emit(TaskEvent::ParamsUpdated { params });
        Ok(())
    }
}

fn validate_fee(fee: &Coin, params: &Params) -> Result<()> {
    if fee.denom != params.fee_denom {
        return Err(TaskError::InvalidFee(format!(
            "fee must be in {}, got {}",
            params.fee_denom, fee.denom
        )));
    }
    if !fee.is_positive() {
        return Err(TaskError::InvalidFee(format!("fee {fee} must be positive")));
    }
    Ok(())
}
