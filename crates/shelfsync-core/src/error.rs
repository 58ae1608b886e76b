//! Error types for shelfsync-core

use thiserror::Error;

use crate::platforms::PlatformError;

/// Result type alias using shelfsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in shelfsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Referenced record or snapshot not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Idempotency key reused with a different payload
    #[error("Idempotency conflict: {0}")]
    Conflict(String),

    /// A request with the same idempotency key is still running
    #[error("Request already in progress: {0}")]
    InProgress(String),

    /// External platform failure
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
}
