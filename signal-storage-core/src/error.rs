/*!
Error types for the signal storage core.
*/

use thiserror::Error;

/// Result type used throughout the signal storage core.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur while reading, writing or binding persisted state.
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O errors from file-backed stores
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Key-value backend errors (get/set/remove/clear)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Failures raised by serialize/deserialize hooks
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// State that cannot be represented as a field mapping
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Binding to a container that has no fields
    #[error("cannot bind storage to a container without state fields")]
    EmptyState,
}

impl StorageError {
    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new serialization error
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a new invalid state error
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }
}
