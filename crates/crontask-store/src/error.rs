use thiserror::Error;

use crontask_core::{CoreError, TaskId, TaskStatus};

/// Errors raised by the key/value layer and the task store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No task record under the given id.
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    /// A stored value could not be decoded or an index entry is malformed.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// Attempt to move a task out of a terminal status.
    #[error("Task {id}: illegal status transition {from} -> {to}")]
    IllegalTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "NOT_FOUND",
            StoreError::InvalidCursor(_) => "INVALID_CURSOR",
            StoreError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            StoreError::Core(e) => e.code(),
            _ => "STORE_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
