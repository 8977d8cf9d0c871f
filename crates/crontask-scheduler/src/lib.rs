//! `crontask-scheduler`: deferred task execution over a [`crontask_store::TaskStore`].
//!
//! # Overview
//!
//! Tasks are created through [`TaskService`] and executed by [`Scheduler::tick`],
//! which the host calls once per time step (or lets [`SchedulerEngine`] call on
//! a tokio interval). Each tick:
//!
//! 1. expires pending tasks whose `expiry_time` has passed,
//! 2. walks due tasks in `(scheduled_time, id)` order, collecting each fee and
//!    running its operations in an isolated, metered [`ExecScope`],
//! 3. removes old terminal tasks.
//!
//! # Task states
//!
//! | Status    | Reached when                                         |
//! |-----------|------------------------------------------------------|
//! | `Pending` | created                                              |
//! | `Done`    | fee collected and every operation succeeded          |
//! | `Failed`  | fee collection or an operation failed                |
//! | `Expired` | `expiry_time` passed before execution                |

pub mod bank;
pub mod cleanup;
pub mod driver;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod expiry;
pub mod genesis;
pub mod lifecycle;
pub mod ops;
pub mod query;
pub mod router;
pub mod scope;

pub use bank::{FeeCollector, Ledger, FEE_COLLECTOR_ACCOUNT};
pub use driver::{Scheduler, TickReport};
pub use engine::{Clock, ManualClock, SchedulerEngine, SystemClock};
pub use error::{FeeError, OperationError, Result, TaskError};
pub use events::{EventSink, TaskEvent};
pub use executor::{ExecOutcome, Execution, ExecutionEngine};
pub use genesis::{export_genesis, init_genesis};
pub use lifecycle::{CreateTaskRequest, TaskService};
pub use ops::register_builtin;
pub use query::TaskQuery;
pub use router::{OperationHandler, OperationRouter};
pub use scope::{CostMeter, ExecScope};
