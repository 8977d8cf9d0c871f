use thiserror::Error;

use crate::types::TaskStatus;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid time format: {0}")]
    InvalidTimeFormat(String),

    #[error("Invalid coin: {0}")]
    InvalidCoin(String),

    #[error("Unknown task status: {0}")]
    InvalidStatus(String),

    #[error("Invalid genesis state: {0}")]
    InvalidGenesis(String),

    /// Terminal states never change; see [`TaskStatus::can_transition_to`].
    #[error("Illegal status transition {from} -> {to}")]
    IllegalTransition { from: TaskStatus, to: TaskStatus },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Short, stable error code for callers that match on kinds.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::InvalidParams(_) => "INVALID_PARAMS",
            CoreError::InvalidAddress(_) => "INVALID_ADDRESS",
            CoreError::InvalidTimeFormat(_) => "INVALID_TIME_FORMAT",
            CoreError::InvalidCoin(_) => "INVALID_COIN",
            CoreError::InvalidStatus(_) => "INVALID_STATUS",
            CoreError::InvalidGenesis(_) => "INVALID_GENESIS",
            CoreError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            CoreError::Serialization(_) => "SERIALIZATION_ERROR",
            CoreError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
