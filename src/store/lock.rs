//! Advisory File Lock Module
//!
//! Exclusive advisory locks on value files with a bounded retry budget.

use std::fs::File;
use std::io;
use std::path::Path;

use fs2::FileExt;
use tracing::{debug, warn};

use crate::config::LockPolicy;
use crate::error::{Result, StoreError};

// == File Lock ==
/// An exclusive advisory lock held on an open file.
///
/// The lock is released when the guard is dropped. Only processes that use
/// the same locking discipline are coordinated.
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl FileLock {
    // == Acquire ==
    /// Takes an exclusive lock on `file`, retrying on contention.
    ///
    /// Tries a non-blocking lock; while another holder has it, waits
    /// `policy.retry_interval` and tries again. After `policy.retries` failed
    /// retries returns `StoreError::LockTimeout`. Errors other than contention
    /// are returned immediately.
    ///
    /// # Arguments
    /// * `file` - The open file to lock
    /// * `path` - Path of the file, used for logging and errors
    /// * `policy` - Retry budget
    pub async fn acquire(file: File, path: &Path, policy: &LockPolicy) -> Result<Self> {
        let attempts = policy.retries.saturating_add(1);

        for attempt in 1..=attempts {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file }),
                Err(e) if is_contended(&e) => {
                    if attempt == attempts {
                        break;
                    }
                    debug!(
                        path = %path.display(),
                        attempt = attempt,
                        "Lock held elsewhere, retrying"
                    );
                    tokio::time::sleep(policy.retry_interval).await;
                }
                Err(e) => return Err(StoreError::Io(e)),
            }
        }

        warn!(
            path = %path.display(),
            attempts = attempts,
            "Gave up waiting for file lock"
        );
        Err(StoreError::LockTimeout {
            path: path.to_path_buf(),
            attempts,
        })
    }

    /// Returns the locked file.
    pub fn file(&self) -> &File {
        &self.file
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Closing the handle releases the lock as well
        let _ = FileExt::unlock(&self.file);
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
