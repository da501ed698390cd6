//! Storage error types.

use hodl_core::Hash;
use thiserror::Error;

/// Errors from reading or writing the store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Store is opened read-only")]
    ReadOnly,

    /// A persisted invariant was violated. Latched: every later call on the
    /// store returns this error.
    #[error("Storage corruption: {0}")]
    Corruption(String),

    #[error("Chain not initialized")]
    NotInitialized,

    #[error("Chain already initialized")]
    AlreadyInitialized,

    #[error("Invalid genesis: {0}")]
    InvalidGenesis(String),

    #[error("State replay out of order: got height {height}, expected {expected}")]
    ReplayOutOfOrder { height: u64, expected: u64 },
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Why a block could not be appended.
#[derive(Error, Debug)]
pub enum AppendError {
    /// The head moved since the candidate was assembled; reassemble.
    #[error("Head mismatch: candidate builds on {got}, head is {expected}")]
    HeadMismatch { expected: Hash, got: Hash },

    #[error("Height mismatch: expected {expected}, got {got}")]
    HeightMismatch { expected: u64, got: u64 },

    #[error("Block hash does not match its header")]
    HashMismatch,

    #[error("Store is opened read-only")]
    ReadOnly,

    #[error("Store is corrupted: {0}")]
    Corrupted(String),

    #[error(transparent)]
    Storage(StoreError),
}

impl From<StoreError> for AppendError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ReadOnly => AppendError::ReadOnly,
            StoreError::Corruption(msg) => AppendError::Corrupted(msg),
            other => AppendError::Storage(other),
        }
    }
}
