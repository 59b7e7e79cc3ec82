//! Grid-specific error types

use thiserror::Error;

use super::types::LevelState;

/// Errors that can occur in grid trading operations
#[derive(Error, Debug, Clone)]
pub enum GridError {
    /// Invalid ladder or grid parameters. Fatal at construction, never retried.
    #[error("Invalid grid configuration: {0}")]
    InvalidConfig(String),

    /// The exchange declined a submission. The level keeps its pre-submission
    /// state and is retried on a later tick.
    #[error("Order rejected for {ticker} at {price}: {reason}")]
    OrderRejected {
        ticker: String,
        price: f64,
        reason: String,
    },

    /// A price or status fetch failed; the current tick is skipped.
    #[error("Transient feed error: {0}")]
    TransientFeed(String),

    /// A remote order whose price matches no ladder level.
    #[error("Remote order {order_id} for {ticker} at {price} matches no ladder level")]
    ReconciliationAmbiguity {
        ticker: String,
        order_id: u64,
        price: f64,
    },

    #[error("Level {index} cannot {action} while {state:?}")]
    InvalidTransition {
        index: usize,
        state: LevelState,
        action: &'static str,
    },

    #[error("Grid level not found: index {0}")]
    LevelNotFound(usize),

    #[error("{operation} timed out after {after_ms}ms")]
    Timeout {
        operation: &'static str,
        after_ms: u64,
    },

    #[error("Exchange error: {0}")]
    Exchange(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),
}

impl GridError {
    /// Errors that are recovered by simply trying again on a later tick
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GridError::TransientFeed(_)
                | GridError::Timeout { .. }
                | GridError::Exchange(_)
                | GridError::OrderRejected { .. }
        )
    }
}

impl From<config::ConfigError> for GridError {
    fn from(err: config::ConfigError) -> Self {
        GridError::Settings(err.to_string())
    }
}

impl From<serde_json::Error> for GridError {
    fn from(err: serde_json::Error) -> Self {
        GridError::JsonParse(err.to_string())
    }
}

impl From<std::io::Error> for GridError {
    fn from(err: std::io::Error) -> Self {
        GridError::Io(err.to_string())
    }
}

/// Result type for grid operations
pub type GridResult<T> = std::result::Result<T, GridError>;
