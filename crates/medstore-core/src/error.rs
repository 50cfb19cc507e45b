//! Error types for medstore

use std::time::Duration;
use thiserror::Error;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the local structured store.
///
/// A missing record is never an error; reads return `Option` instead.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The database could not be opened or upgraded.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A primary key already exists in the collection.
    #[error("Constraint error: {0}")]
    Constraint(String),

    /// A read or write failed after the transaction started.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Invalid key, unknown collection or index, or a record that cannot be encoded.
    #[error("Data error: {0}")]
    Data(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised by the caller-side timeout helper, never by the store itself.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    /// Create a new connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a new constraint error
    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }

    /// Create a new transaction error
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Create a new data error
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            StoreError::Connection(_) => "connection",
            StoreError::Constraint(_) => "constraint",
            StoreError::Transaction(_) => "transaction",
            StoreError::Data(_) => "data",
            StoreError::Config(_) => "config",
            StoreError::Io(_) => "io",
            StoreError::Timeout(_) => "timeout",
        }
    }

    /// Whether the caller should switch to a non-persistent fallback.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Io(_))
    }
}
