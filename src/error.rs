//! Error types for the key-value store.

use thiserror::Error;

/// Error returned by a caller-supplied transaction update function.
pub type UpdateError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for store operations.
///
/// Contention is not an error: a transaction that loses a race reports
/// `Ok(false)`. Everything here is either a hard backend failure, a failure
/// of the caller's update function, or a malformed request.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Update function failed: {0}")]
    Update(#[source] UpdateError),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl StoreError {
    /// Whether this error came from the storage backend itself.
    pub fn is_backend(&self) -> bool {
        !matches!(self, StoreError::Update(_) | StoreError::InvalidOperation(_))
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
