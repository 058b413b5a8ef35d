//! Configuration Module
//!
//! Handles loading and managing store configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default store capacity (1 GiB)
pub const DEFAULT_CAPACITY: u64 = 1024 * 1024 * 1024;

/// Directory under the user's home used when no path is configured
pub const DEFAULT_DIR_NAME: &str = "localDataStore";

/// Advisory lock retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// Retries after the first failed attempt
    pub retries: u32,
    /// Wait between attempts
    pub retry_interval: Duration,
}

impl LockPolicy {
    /// Upper bound on the time spent waiting for a lock.
    pub fn max_wait(&self) -> Duration {
        self.retry_interval * self.retries
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            retries: 10,
            retry_interval: Duration::from_secs(1),
        }
    }
}

/// Store configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory of the store, None = `~/localDataStore`
    pub path: Option<PathBuf>,
    /// Maximum aggregate size of all entries in bytes
    pub capacity: u64,
    /// Interval between eviction sweeps
    pub sweep_interval: Duration,
    /// Advisory lock retry budget
    pub lock: LockPolicy,
}

impl StoreConfig {
    /// Creates a new StoreConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `LOCALSTORE_PATH` - Store root directory (default: `~/localDataStore`)
    /// - `LOCALSTORE_CAPACITY` - Capacity in bytes (default: 1 GiB)
    /// - `LOCALSTORE_SWEEP_INTERVAL_MS` - Sweep period in milliseconds (default: 2000)
    /// - `LOCALSTORE_LOCK_RETRIES` - Lock retries (default: 10)
    /// - `LOCALSTORE_LOCK_RETRY_INTERVAL_MS` - Wait between lock attempts (default: 1000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            path: env::var("LOCALSTORE_PATH")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            capacity: env::var("LOCALSTORE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.capacity),
            sweep_interval: env::var("LOCALSTORE_SWEEP_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.sweep_interval),
            lock: LockPolicy {
                retries: env::var("LOCALSTORE_LOCK_RETRIES")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.lock.retries),
                retry_interval: env::var("LOCALSTORE_LOCK_RETRY_INTERVAL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.lock.retry_interval),
            },
        }
    }

    /// Sets the store root directory. An empty path selects the default.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.path = if path.as_os_str().is_empty() {
            None
        } else {
            Some(path)
        };
        self
    }

    /// Sets the store capacity in bytes.
    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the eviction sweep period.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the advisory lock retry budget.
    pub fn with_lock_policy(mut self, lock: LockPolicy) -> Self {
        self.lock = lock;
        self
    }

    /// Resolves the root directory, falling back to `~/localDataStore`.
    ///
    /// Returns None when no path is configured and the home directory is unknown.
    pub fn resolve_path(&self) -> Option<PathBuf> {
        match &self.path {
            Some(path) => Some(path.clone()),
            None => dirs::home_dir().map(|home| home.join(DEFAULT_DIR_NAME)),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            capacity: DEFAULT_CAPACITY,
            sweep_interval: Duration::from_secs(2),
            lock: LockPolicy::default(),
        }
    }
}
