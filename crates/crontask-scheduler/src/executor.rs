use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use crontask_core::{CostSchedule, OperationResult, Task, Timestamp};
use crontask_store::{KvStore, WriteBatch};

use crate::error::OperationError;
use crate::router::OperationRouter;
use crate::scope::ExecScope;

/// What one execution attempt produced.
#[derive(Debug)]
pub enum ExecOutcome {
    /// Every operation succeeded. `writes` holds the buffered state changes,
    /// not yet applied to the parent store.
    Success {
        results: Vec<OperationResult>,
        writes: WriteBatch,
    },
    /// Operation `index` failed; nothing from this task is kept.
    Failure { index: usize, error: OperationError },
}

#[derive(Debug)]
pub struct Execution {
    pub outcome: ExecOutcome,
    pub cost_used: u64,
}

impl Execution {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ExecOutcome::Success { .. })
    }

    /// The text recorded in a failed task's `error_log`.
    pub fn error_log(&self) -> Option<String> {
        match &self.outcome {
            ExecOutcome::Success { .. } => None,
            ExecOutcome::Failure { index, error } => {
                Some(format!("operation at index {index} failed: {error}"))
            }
        }
    }
}

/// Runs a task's operations in order inside an isolated, metered scope.
pub struct ExecutionEngine {
    router: Arc<OperationRouter>,
    costs: CostSchedule,
}

impl ExecutionEngine {
    pub fn new(router: Arc<OperationRouter>, costs: CostSchedule) -> Self {
        Self { router, costs }
    }

    pub fn router(&self) -> &Arc<OperationRouter> {
        &self.router
    }

    /// Execute `task.operations` against a write buffer over `state`.
    ///
    /// Stops at the first failing operation. A panic inside a handler is
    /// caught here and reported as a failure of that operation. `state` is
    /// never written; on success the caller commits `writes`.
    pub fn execute(&self, task: &Task, state: &dyn KvStore, now: Timestamp) -> Execution {
        let mut scope = ExecScope::new(state, &self.costs, task, now);
        let mut results = Vec::with_capacity(task.operations.len());

        for (index, op) in task.operations.iter().enumerate() {
            let attempt = catch_unwind(AssertUnwindSafe(|| {
                scope.consume(self.costs.op_base, "operation base")?;
                self.router.dispatch(op, &mut scope)
            }));

            let outcome = match attempt {
                Ok(res) => res,
                Err(payload) => Err(OperationError::Panicked(panic_message(payload.as_ref()))),
            }
            .and_then(|r| {
                // A handler may swallow a metering error and still return Ok.
                if scope.meter().exceeded() {
                    Err(OperationError::OutOfCost {
                        used: scope.meter().used(),
                        limit: scope.meter().limit(),
                        descriptor: format!("operation {}", op.kind),
                    })
                } else {
                    Ok(r)
                }
            });

            match outcome {
                Ok(result) => results.push(result),
                Err(error) => {
                    warn!(
                        task_id = %task.id,
                        index,
                        kind = %op.kind,
                        error = %error,
                        "operation failed, discarding task effects"
                    );
                    return Execution {
                        cost_used: scope.meter().used(),
                        outcome: ExecOutcome::Failure { index, error },
                    };
                }
            }
        }

        let last = task.operations.len().saturating_sub(1);
        match scope.finish() {
            Ok((writes, cost_used)) => {
                debug!(task_id = %task.id, cost_used, writes = writes.len(), "task operations succeeded");
                Execution {
                    outcome: ExecOutcome::Success { results, writes },
                    cost_used,
                }
            }
            Err(error) => Execution {
                outcome: ExecOutcome::Failure { index: last, error },
                cost_used: task.cost_limit,
            },
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
