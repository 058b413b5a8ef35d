//! Local Store Module
//!
//! Public facade of the store: validates keys and values, delegates
//! persistence to the [`FileStore`] and registers TTLs for the eviction
//! sweeper.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::store::{EvictionRegistry, FileStore, MAX_KEY_LENGTH, MAX_VALUE_SIZE};
use crate::tasks::{spawn_eviction_task, EvictionHandle};

/// A stored value
pub type Document = serde_json::Value;

// == Store Stats ==
/// Point-in-time usage summary of a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Canonical root directory
    pub path: PathBuf,
    /// Number of stored entries
    pub keys: usize,
    /// Aggregate size of all entries in bytes
    pub used_bytes: u64,
    /// Maximum aggregate size in bytes
    pub capacity: u64,
    /// Entries with a registered TTL
    pub ttl_entries: usize,
}

// == Local Store ==
/// Filesystem-backed key-value store with TTL eviction.
///
/// Client operations (create, read, delete) run one at a time under a
/// store-wide lock, whatever their keys. The eviction sweeper runs beside
/// them and is stopped by [`LocalStore::shutdown`] or when the store is
/// dropped.
#[derive(Debug)]
pub struct LocalStore {
    files: Arc<FileStore>,
    registry: Arc<EvictionRegistry>,
    /// Serializes client operations
    gate: Mutex<()>,
    sweeper: EvictionHandle,
}

impl LocalStore {
    // == Constructor ==
    /// Opens the store described by `config` and starts its eviction sweeper.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns `StoreError::Io` if the root directory cannot be created, or if
    /// no path is configured and the home directory is unknown.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        let root = config.resolve_path().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                "no store path configured and home directory is unavailable",
            )
        })?;

        let files = Arc::new(FileStore::open(root, config.capacity, config.lock).await?);
        let registry = Arc::new(EvictionRegistry::new());
        let sweeper = spawn_eviction_task(files.clone(), registry.clone(), config.sweep_interval);

        info!("Local store ready at {}", files.path().display());

        Ok(Self {
            files,
            registry,
            gate: Mutex::new(()),
            sweeper,
        })
    }

    // == Create ==
    /// Stores `value` under `key` without expiry.
    pub async fn create(&self, key: &str, value: &Document) -> Result<()> {
        self.create_with_ttl(key, value, 0).await
    }

    /// Stores `value` under `key`, evicted `ttl_secs` seconds after creation.
    ///
    /// A TTL of 0 means the entry never expires.
    ///
    /// # Errors
    /// - `InvalidKey` if the key is empty, too long, not a single path
    ///   component, or already present
    /// - `PayloadTooLarge` if the serialized value exceeds `MAX_VALUE_SIZE`
    /// - `QuotaExceeded`, `LockTimeout` or `Io` from the file store
    pub async fn create_with_ttl(&self, key: &str, value: &Document, ttl_secs: u64) -> Result<()> {
        let _guard = self.gate.lock().await;

        validate_key(key)?;
        if self.files.exists(key) {
            return Err(StoreError::InvalidKey(format!(
                "Key already exists in store: {key}"
            )));
        }

        let bytes = serde_json::to_vec(value)?;
        if bytes.len() > MAX_VALUE_SIZE {
            return Err(StoreError::PayloadTooLarge {
                size: bytes.len(),
                max: MAX_VALUE_SIZE,
            });
        }

        self.files.write(key, &bytes).await?;

        if ttl_secs > 0 {
            self.registry.register(key, ttl_secs).await;
        } else {
            // Drop a registration left over from a deleted entry of the same key
            self.registry.unregister(key).await;
        }

        debug!(key = %key, size = bytes.len(), ttl = ttl_secs, "Entry created");
        Ok(())
    }

    // == Read ==
    /// Returns the document stored under `key`.
    ///
    /// # Errors
    /// - `InvalidKey` if the key is invalid or not present
    /// - `LockTimeout` or `Io` from the file store; a stored value that no
    ///   longer decodes is reported as `Io` with `InvalidData`
    pub async fn read(&self, key: &str) -> Result<Document> {
        let _guard = self.gate.lock().await;

        self.ensure_present(key)?;
        let bytes = self.files.read(key).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    // == Delete ==
    /// Removes the entry stored under `key`.
    ///
    /// A pending TTL registration for the key is left for the sweeper to
    /// discard.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.gate.lock().await;

        self.ensure_present(key)?;
        self.files.delete(key).await?;

        debug!(key = %key, "Entry deleted");
        Ok(())
    }

    // == Exists ==
    /// Checks whether an entry exists for `key`.
    pub fn exists(&self, key: &str) -> bool {
        validate_key(key).is_ok() && self.files.exists(key)
    }

    /// Returns the canonical root directory of the store.
    pub fn store_path(&self) -> &Path {
        self.files.path()
    }

    /// Returns the capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.files.capacity()
    }

    /// Returns the current aggregate size of all entries in bytes.
    pub async fn size(&self) -> Result<u64> {
        self.files.size_of_store().await
    }

    /// Lists all stored keys, sorted.
    pub async fn keys(&self) -> Result<Vec<String>> {
        self.files.keys().await
    }

    /// Collects current usage figures.
    pub async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            path: self.files.path().to_path_buf(),
            keys: self.files.keys().await?.len(),
            used_bytes: self.files.size_of_store().await?,
            capacity: self.files.capacity(),
            ttl_entries: self.registry.len().await,
        })
    }

    /// Returns the TTL registered for `key`, if any.
    pub async fn ttl_of(&self, key: &str) -> Option<u64> {
        self.registry.ttl_of(key).await
    }

    // == Shutdown ==
    /// Stops the eviction sweeper and waits for it to exit.
    pub async fn shutdown(self) {
        self.sweeper.stop().await;
        info!("Local store at {} shut down", self.files.path().display());
    }

    fn ensure_present(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        if !self.files.exists(key) {
            return Err(StoreError::InvalidKey(format!(
                "Key not present in store: {key}"
            )));
        }
        Ok(())
    }
}

/// Checks that `key` is 1 to `MAX_KEY_LENGTH` bytes and names a single
/// directory below the store root.
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey("Key cannot be empty".to_string()));
    }

    if key.len() > MAX_KEY_LENGTH {
        return Err(StoreError::InvalidKey(format!(
            "Key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }

    if key == "." || key == ".." || key.contains(['/', '\\', '\0']) {
        return Err(StoreError::InvalidKey(format!(
            "Key must be a plain name without path separators: {key}"
        )));
    }

    Ok(())
}
