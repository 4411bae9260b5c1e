//! Common error types for leadpool

use thiserror::Error;

/// Common result type for leadpool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the leadpool crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A source file or row could not be read.
    ///
    /// Row-level parse failures are recovered locally and counted; this
    /// variant surfaces only when an entire file is unreadable.
    #[error("Parse error in {file}: {reason}")]
    Parse { file: String, reason: String },

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Materialized projection rebuild failure.
    ///
    /// The previously live projection is left untouched when this occurs.
    #[error("Materialization error: {0}")]
    Materialize(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
