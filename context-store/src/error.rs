//! Error types for the context store.

use thiserror::Error;

/// Result type alias for context store operations.
pub type Result<T> = std::result::Result<T, ContextError>;

/// Errors that can occur in the context store.
#[derive(Error, Debug)]
pub enum ContextError {
    /// Missing or malformed caller input. Raised before any storage access.
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced session or item does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Storage operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ContextError {
    /// Shorthand for a validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Stable label for the error kind, used by the access surfaces.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) | Self::Serialization(_) | Self::Io(_) => "storage",
        }
    }
}

impl From<rusqlite::Error> for ContextError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Database(err.to_string()))
    }
}

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to create storage directory.
    #[error("failed to create directory: {0}")]
    CreateDirectory(String),

    /// Failed to read a backing file.
    #[error("failed to read file: {0}")]
    ReadFile(String),

    /// Failed to write a backing file.
    #[error("failed to write file: {0}")]
    WriteFile(String),

    /// Failed to delete a backing file.
    #[error("failed to delete file: {0}")]
    DeleteFile(String),

    /// Embedded database error.
    #[error("database error: {0}")]
    Database(String),

    /// A backing file exists but could not be decoded.
    #[error("corrupt file: {0}")]
    Corrupt(String),
}
