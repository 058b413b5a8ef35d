//! Error types for the local store
//!
//! Provides unified error handling using thiserror.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

// == Store Error Enum ==
/// Unified error type for the local store.
///
/// Every public operation fails with exactly one of these kinds.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Empty or over-long key, duplicate key on create, or unknown key on read/delete
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Serialized value is larger than the per-entry limit
    #[error("Payload too large: {size} bytes exceeds the limit of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Store was already at or above capacity before the write
    #[error("Quota exceeded: store uses {used} bytes of {capacity}")]
    QuotaExceeded { used: u64, capacity: u64 },

    /// Advisory lock could not be obtained within the retry budget
    #[error("Timed out acquiring lock on {} after {} attempts, retry later", path.display(), attempts)]
    LockTimeout { path: PathBuf, attempts: u32 },

    /// Underlying filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Returns true when retrying the whole operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::LockTimeout { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Io(io::Error::new(io::ErrorKind::InvalidData, err))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the local store.
pub type Result<T> = std::result::Result<T, StoreError>;
