//! Local Store - An embedded filesystem-backed key-value store
//!
//! Stores JSON documents as one directory per key, with optional TTL eviction
//! by a background sweeper and an overall storage quota.

pub mod config;
pub mod error;
pub mod store;
pub mod tasks;

pub use config::{LockPolicy, StoreConfig};
pub use error::{Result, StoreError};
pub use store::{Document, LocalStore, StoreStats};
