//! Store Module
//!
//! Filesystem-backed key-value storage with advisory locking, a storage quota
//! and TTL registration for background eviction.

mod entry;
mod files;
mod local;
mod lock;
mod registry;


// Re-export public types
pub use entry::EntryMeta;
pub use files::{FileStore, VALUE_FILE_NAME};
pub use local::{Document, LocalStore, StoreStats};
pub use lock::FileLock;
pub use registry::{EvictionRegistry, Registration};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 32;

/// Maximum allowed serialized value size in bytes
pub const MAX_VALUE_SIZE: usize = 16 * 1024; // 16 KB
