//! Error types for the dbgrid state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors raised by the state store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("failed to encode or decode {record}: {reason}")]
    Codec { record: &'static str, reason: String },

    /// A row that must exist is missing or soft-deleted.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
}

impl StateError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        StateError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StateError::NotFound { .. })
    }
}
