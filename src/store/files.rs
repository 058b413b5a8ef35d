//! File Store Module
//!
//! Persistence manager mapping keys to entry directories under a root
//! directory. Knows nothing about TTLs.
//!
//! # Layout
//! `<root>/<key>/value.json` holds the serialized value of `key`.
//!
//! Blocking file I/O (open, write, mapped read, directory walk) runs on the
//! blocking thread pool; only lock retries wait on the async timer.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use memmap2::Mmap;
use tracing::{debug, info, warn};

use crate::config::LockPolicy;
use crate::error::{Result, StoreError};
use crate::store::{EntryMeta, FileLock};

/// Name of the file holding an entry's serialized value
pub const VALUE_FILE_NAME: &str = "value.json";

// == File Store ==
/// Filesystem persistence for store entries.
///
/// Every read, write and delete holds an exclusive advisory lock on the
/// entry's value file for its duration.
#[derive(Debug)]
pub struct FileStore {
    /// Canonical root directory
    root: PathBuf,
    /// Maximum aggregate size of all entries in bytes
    capacity: u64,
    /// Lock retry budget
    lock_policy: LockPolicy,
    /// Makes the next value write fail after the file was written
    #[cfg(test)]
    fail_next_write: std::sync::atomic::AtomicBool,
}

impl FileStore {
    // == Constructor ==
    /// Opens the store at `root`, creating the directory if it is absent.
    ///
    /// # Errors
    /// Returns `StoreError::Io` if the directory cannot be created or resolved.
    pub async fn open(
        root: impl Into<PathBuf>,
        capacity: u64,
        lock_policy: LockPolicy,
    ) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let root = tokio::fs::canonicalize(&root).await?;

        info!(
            path = %root.display(),
            capacity = capacity,
            "File store opened"
        );

        Ok(Self {
            root,
            capacity,
            lock_policy,
            #[cfg(test)]
            fail_next_write: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Returns the canonical root directory.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Returns the capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    fn entry_dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.entry_dir(key).join(VALUE_FILE_NAME)
    }

    // == Exists ==
    /// Checks whether an entry directory exists for `key`. Takes no lock.
    pub fn exists(&self, key: &str) -> bool {
        self.entry_dir(key).exists()
    }

    // == Write ==
    /// Creates the entry for `key` holding `bytes`.
    ///
    /// The quota is checked first against the current store size; the new
    /// bytes are not counted. If anything fails after the entry directory was
    /// created, the directory is removed again.
    ///
    /// # Errors
    /// - `QuotaExceeded` if the store is already at or above capacity
    /// - `InvalidKey` if an entry for `key` already exists
    /// - `LockTimeout` if the value file stays locked
    /// - `Io` for any filesystem failure
    pub async fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.check_quota().await?;

        let dir = self.entry_dir(key);
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::InvalidKey(format!(
                    "Key already present in store: {key}"
                )));
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(err) = self.write_value(key, bytes).await {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&dir).await {
                warn!(
                    key = %key,
                    error = %cleanup,
                    "Failed to remove partially written entry"
                );
            }
            return Err(err);
        }

        debug!(key = %key, size = bytes.len(), "Entry written");
        Ok(())
    }

    async fn write_value(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.value_path(key);
        // create_new: an existing value file is never appended to
        let file = blocking({
            let path = path.clone();
            move || OpenOptions::new().write(true).create_new(true).open(path)
        })
        .await?;
        let lock = FileLock::acquire(file, &path, &self.lock_policy).await?;

        let bytes = bytes.to_vec();
        blocking(move || {
            let mut file = lock.file();
            file.write_all(&bytes)?;
            file.flush()
        })
        .await?;

        #[cfg(test)]
        if self
            .fail_next_write
            .swap(false, std::sync::atomic::Ordering::SeqCst)
        {
            return Err(io::Error::other("injected write failure").into());
        }

        Ok(())
    }

    // == Read ==
    /// Returns the serialized value stored for `key`.
    ///
    /// The caller is expected to have checked that the key exists. A value
    /// file removed in the meantime surfaces as `StoreError::Io` with
    /// `NotFound`.
    pub async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.value_path(key);
        let file = blocking({
            let path = path.clone();
            move || File::open(path)
        })
        .await?;
        let lock = FileLock::acquire(file, &path, &self.lock_policy).await?;

        blocking(move || {
            if lock.file().metadata()?.len() == 0 {
                return Ok(Vec::new());
            }

            // SAFETY: the value file is only ever written once, under the same
            // exclusive lock we hold for the lifetime of the mapping.
            let map = unsafe { Mmap::map(lock.file())? };
            Ok(map.to_vec())
        })
        .await
    }

    // == Delete ==
    /// Removes the entry directory of `key` while holding its lock.
    ///
    /// An entry directory without a value file is removed without locking.
    /// A missing entry surfaces as `StoreError::Io` with `NotFound`.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let dir = self.entry_dir(key);
        let Some(lock) = self.lock_entry(key).await? else {
            warn!(key = %key, "Removing entry without a value file");
            tokio::fs::remove_dir_all(&dir).await?;
            return Ok(());
        };

        tokio::fs::remove_dir_all(&dir).await?;
        drop(lock);

        debug!(key = %key, "Entry deleted");
        Ok(())
    }

    // == Delete If Created At ==
    /// Removes the entry of `key` only if its value file was created at
    /// `created_at`.
    ///
    /// The creation time is checked while holding the lock, so an entry that
    /// was deleted and created again since `created_at` was read is kept.
    /// Returns whether the entry was removed.
    pub async fn delete_if_created_at(
        &self,
        key: &str,
        created_at: DateTime<Utc>,
    ) -> Result<bool> {
        let path = self.value_path(key);
        let file = blocking({
            let path = path.clone();
            move || File::open(path)
        })
        .await?;
        let lock = FileLock::acquire(file, &path, &self.lock_policy).await?;

        let current = EntryMeta::from_metadata(&lock.file().metadata()?)?;
        if current.created_at != created_at {
            debug!(key = %key, "Entry was replaced, keeping it");
            return Ok(false);
        }

        tokio::fs::remove_dir_all(self.entry_dir(key)).await?;
        drop(lock);

        debug!(key = %key, "Entry deleted");
        Ok(true)
    }

    /// Locks the value file of `key`. Returns None if the entry directory
    /// exists without a value file.
    async fn lock_entry(&self, key: &str) -> Result<Option<FileLock>> {
        let path = self.value_path(key);
        let opened = blocking({
            let path = path.clone();
            move || File::open(path)
        })
        .await;

        let file = match opened {
            Ok(file) => file,
            Err(StoreError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                match tokio::fs::metadata(self.entry_dir(key)).await {
                    Ok(meta) if meta.is_dir() => return Ok(None),
                    _ => return Err(StoreError::Io(e)),
                }
            }
            Err(e) => return Err(e),
        };

        let lock = FileLock::acquire(file, &path, &self.lock_policy).await?;
        Ok(Some(lock))
    }

    // == Meta ==
    /// Returns the creation time and size of the value stored for `key`.
    pub async fn meta(&self, key: &str) -> Result<EntryMeta> {
        let meta = tokio::fs::metadata(self.value_path(key)).await?;
        Ok(EntryMeta::from_metadata(&meta)?)
    }

    // == Keys ==
    /// Lists the keys of all entries, sorted.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;

        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                keys.push(name);
            }
        }

        keys.sort();
        Ok(keys)
    }

    // == Size Of Store ==
    /// Returns the aggregate size in bytes of all files under the root.
    ///
    /// Walks the whole directory tree on the blocking thread pool.
    pub async fn size_of_store(&self) -> Result<u64> {
        let root = self.root.clone();
        blocking(move || dir_size(&root)).await
    }

    async fn check_quota(&self) -> Result<()> {
        let used = self.size_of_store().await?;
        if used >= self.capacity {
            warn!(
                used = used,
                capacity = self.capacity,
                "Store is at capacity, rejecting write"
            );
            return Err(StoreError::QuotaExceeded {
                used,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    #[cfg(test)]
    fn inject_write_failure(&self) {
        self.fail_next_write
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

/// Runs blocking file I/O on the blocking thread pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let value = tokio::task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)??;
    Ok(value)
}

/// Recursively sums file sizes below `path`, skipping files removed mid-walk.
fn dir_size(path: &Path) -> io::Result<u64> {
    let mut total = 0;

    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };

        if meta.is_dir() {
            match dir_size(&entry.path()) {
                Ok(size) => total += size,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
        } else {
            total += meta.len();
        }
    }

    Ok(total)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use fs2::FileExt;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    const TEST_CAPACITY: u64 = 1024 * 1024;

    fn quick_policy() -> LockPolicy {
        LockPolicy {
            retries: 2,
            retry_interval: Duration::from_millis(10),
        }
    }

    async fn open_store(dir: &TempDir, capacity: u64) -> FileStore {
        FileStore::open(dir.path().join("store"), capacity, quick_policy())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_open_creates_root() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, TEST_CAPACITY).await;

        assert!(store.path().is_dir());
        assert!(store.path().ends_with("store"));
        assert_eq!(store.capacity(), TEST_CAPACITY);
    }

    #[tokio::test]
    async fn test_open_reuses_existing_root() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, TEST_CAPACITY).await;
        assert_ok!(store.write("key1", b"{\"a\":1}").await);

        let reopened = open_store(&dir, TEST_CAPACITY).await;
        assert!(reopened.exists("key1"));
    }

    #[tokio::test]
    async fn test_open_fails_when_root_is_a_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("not_a_dir");
        std::fs::write(&path, b"x").unwrap();

        let result = FileStore::open(&path, TEST_CAPACITY, quick_policy()).await;
        assert!(matches!(result, Err(StoreError::Io(_))));
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, TEST_CAPACITY).await;

        store.write("key1", b"{\"userId\":\"user1\"}").await.unwrap();

        assert!(store.exists("key1"));
        assert!(store.path().join("key1").join(VALUE_FILE_NAME).is_file());
        assert_eq!(store.read("key1").await.unwrap(), b"{\"userId\":\"user1\"}");
    }

    #[tokio::test]
    async fn test_write_duplicate_key() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, TEST_CAPACITY).await;

        store.write("key1", b"first").await.unwrap();
        let result = store.write("key1", b"second").await;

        assert!(matches!(result, Err(StoreError::InvalidKey(_))));
        assert_eq!(store.read("key1").await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_read_missing_is_io_error() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, TEST_CAPACITY).await;

        match store.read("missing").await {
            Err(StoreError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_removes_directory() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, TEST_CAPACITY).await;

        store.write("key1", b"value").await.unwrap();
        store.delete("key1").await.unwrap();

        assert!(!store.exists("key1"));
        assert_err!(store.delete("key1").await);
    }

    #[tokio::test]
    async fn test_delete_entry_without_value_file() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, TEST_CAPACITY).await;

        std::fs::create_dir(store.path().join("orphan")).unwrap();
        assert!(store.exists("orphan"));

        store.delete("orphan").await.unwrap();
        assert!(!store.exists("orphan"));
    }

    #[tokio::test]
    async fn test_locked_entry_times_out() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, TEST_CAPACITY).await;
        store.write("key1", b"value").await.unwrap();

        let holder = File::open(store.path().join("key1").join(VALUE_FILE_NAME)).unwrap();
        holder.try_lock_exclusive().unwrap();

        let read = store.read("key1").await;
        assert!(matches!(read, Err(StoreError::LockTimeout { .. })));
        let delete = store.delete("key1").await;
        assert!(matches!(delete, Err(ref e) if e.is_transient()));
        assert!(store.exists("key1"));

        FileExt::unlock(&holder).unwrap();
        assert_ok!(store.delete("key1").await);
    }

    #[tokio::test]
    async fn test_size_of_store() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, TEST_CAPACITY).await;

        assert_eq!(store.size_of_store().await.unwrap(), 0);

        store.write("a", &[b'x'; 100]).await.unwrap();
        store.write("b", &[b'y'; 250]).await.unwrap();
        assert_eq!(store.size_of_store().await.unwrap(), 350);

        store.delete("a").await.unwrap();
        assert_eq!(store.size_of_store().await.unwrap(), 250);
    }

    #[tokio::test]
    async fn test_quota_checked_before_write() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 1000).await;

        // Under capacity before the write, so it succeeds and overshoots
        store.write("big", &[b'x'; 1500]).await.unwrap();

        let result = store.write("next", b"small").await;
        match result {
            Err(StoreError::QuotaExceeded { used, capacity }) => {
                assert_eq!(used, 1500);
                assert_eq!(capacity, 1000);
            }
            other => panic!("expected quota error, got {other:?}"),
        }
        assert!(!store.exists("next"));
    }

    #[tokio::test]
    async fn test_quota_rejects_at_capacity() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 9).await;

        // Exactly at capacity counts as full
        store.write("full", b"123456789").await.unwrap();
        assert_eq!(store.size_of_store().await.unwrap(), 9);

        match store.write("next", b"1").await {
            Err(StoreError::QuotaExceeded { used, capacity }) => {
                assert_eq!(used, 9);
                assert_eq!(capacity, 9);
            }
            other => panic!("expected quota error, got {other:?}"),
        }
        assert!(!store.exists("next"));
    }

    #[tokio::test]
    async fn test_quota_allows_write_just_below_capacity() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 9).await;

        store.write("first", b"12345678").await.unwrap();
        assert_ok!(store.write("second", b"1").await);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_entry() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, TEST_CAPACITY).await;

        store.inject_write_failure();
        let result = store.write("key1", b"value").await;

        assert!(matches!(result, Err(StoreError::Io(_))));
        assert!(!store.exists("key1"));
        assert!(store.keys().await.unwrap().is_empty());
        assert_eq!(store.size_of_store().await.unwrap(), 0);

        // The key is free to be created again
        store.write("key1", b"value").await.unwrap();
        assert_eq!(store.read("key1").await.unwrap(), b"value");
    }

    #[tokio::test]
    async fn test_delete_if_created_at_removes_same_entry() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, TEST_CAPACITY).await;

        store.write("key1", b"value").await.unwrap();
        let meta = store.meta("key1").await.unwrap();

        assert!(store.delete_if_created_at("key1", meta.created_at).await.unwrap());
        assert!(!store.exists("key1"));
    }

    #[tokio::test]
    async fn test_delete_if_created_at_keeps_recreated_entry() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, TEST_CAPACITY).await;

        store.write("key1", b"old").await.unwrap();
        let stale = store.meta("key1").await.unwrap();

        store.delete("key1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.write("key1", b"new").await.unwrap();

        let removed = store.delete_if_created_at("key1", stale.created_at).await.unwrap();
        assert!(!removed);
        assert_eq!(store.read("key1").await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_delete_if_created_at_missing_entry() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, TEST_CAPACITY).await;

        match store.delete_if_created_at("missing", chrono::Utc::now()).await {
            Err(StoreError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_meta_and_keys() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, TEST_CAPACITY).await;

        store.write("beta", b"12345").await.unwrap();
        store.write("alpha", b"1").await.unwrap();

        let meta = store.meta("beta").await.unwrap();
        assert_eq!(meta.size, 5);
        assert!(!meta.is_expired(60, chrono::Utc::now()));

        assert_eq!(store.keys().await.unwrap(), vec!["alpha", "beta"]);
    }
}
