//! `crontask-store`: ordered key/value storage and the indexed task store.
//!
//! # Backends
//!
//! | Type        | Behaviour                                              |
//! |-------------|--------------------------------------------------------|
//! | `MemoryKv`  | `BTreeMap` behind a `RwLock`                           |
//! | `SqliteKv`  | one `kv` table, each batch in one SQLite transaction   |
//! | `PrefixKv`  | namespace inside a parent store                        |
//! | `CacheKv`   | write-buffered overlay, committed as one batch         |
//!
//! [`TaskStore`] keeps task records and their creator, status+time and
//! status+price indexes consistent by writing all of them in one batch.
//! [`StateRoot`] puts the task store and the application state in one backing
//! store so a task's final record and its effects commit together.

pub mod cache;
pub mod error;
pub mod keys;
pub mod kv;
pub mod page;
pub mod prefix;
pub mod root;
pub mod sqlite;
pub mod task_store;

pub use cache::CacheKv;
pub use error::{Result, StoreError};
pub use kv::{BatchOp, KvStore, MemoryKv, ScanRange, WriteBatch};
pub use page::{Page, PageRequest};
pub use prefix::PrefixKv;
pub use root::{StateRoot, STATE_NAMESPACE, TASKS_NAMESPACE};
pub use sqlite::SqliteKv;
pub use task_store::{TaskIndex, TaskStore};
