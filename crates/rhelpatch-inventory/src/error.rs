//! Error types for rhelpatch-inventory

use thiserror::Error;

/// Errors that can occur while collecting facts
#[derive(Error, Debug, Clone)]
pub enum InventoryError {
    /// Command ran but exited non-zero
    #[error("query failed ({status}): {message}")]
    QueryFailed {
        /// Exit status
        status: i32,
        /// stderr, or stdout when stderr was empty
        message: String,
    },

    /// Output did not have the expected shape
    #[error("parse error: {0}")]
    ParseError(String),

    /// Remote execution error
    #[error("execution error: {0}")]
    ExecutionError(String),
}
