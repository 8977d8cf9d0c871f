//! `crontask-core`: data model, parameters, time specs and configuration
//! shared by every crontask crate.

pub mod config;
pub mod cost;
pub mod error;
pub mod genesis;
pub mod params;
pub mod timespec;
pub mod types;

pub use config::CrontaskConfig;
pub use cost::CostSchedule;
pub use error::{CoreError, Result};
pub use genesis::GenesisState;
pub use params::Params;
pub use timespec::TimeSpec;
pub use types::{Address, Coin, Operation, OperationResult, Task, TaskId, TaskStatus, Timestamp};
