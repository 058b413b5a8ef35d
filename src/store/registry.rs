//! Eviction Registry Module
//!
//! Shared mapping from key to TTL, filled by the store facade and drained by
//! the eviction sweeper.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

// == Registration ==
/// A TTL registered for one key.
///
/// Each call to [`EvictionRegistry::register`] produces a distinct
/// registration, even for the same key and TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// Seconds after creation at which the entry becomes evictable
    pub ttl_secs: u64,
    id: u64,
}

// == Eviction Registry ==
/// Thread-safe key to TTL mapping.
#[derive(Debug, Default)]
pub struct EvictionRegistry {
    entries: RwLock<HashMap<String, Registration>>,
    next_id: AtomicU64,
}

impl EvictionRegistry {
    // == Constructor ==
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // == Register ==
    /// Registers `ttl_secs` for `key`, replacing any earlier registration.
    pub async fn register(&self, key: &str, ttl_secs: u64) -> Registration {
        let registration = Registration {
            ttl_secs,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        self.entries
            .write()
            .await
            .insert(key.to_string(), registration);
        registration
    }

    // == Unregister ==
    /// Removes the registration for `key`, returning it if there was one.
    pub async fn unregister(&self, key: &str) -> Option<Registration> {
        self.entries.write().await.remove(key)
    }

    // == TTL Of ==
    /// Returns the TTL registered for `key`.
    pub async fn ttl_of(&self, key: &str) -> Option<u64> {
        self.entries.read().await.get(key).map(|r| r.ttl_secs)
    }

    // == Snapshot ==
    /// Returns a copy of all current registrations.
    pub async fn snapshot(&self) -> Vec<(String, Registration)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(key, registration)| (key.clone(), *registration))
            .collect()
    }

    // == Prune ==
    /// Removes the given registrations.
    ///
    /// A key is only removed if its current registration is the one passed
    /// in; keys registered again in the meantime are kept.
    ///
    /// Returns the number of registrations removed.
    pub async fn prune(&self, done: &[(String, Registration)]) -> usize {
        let mut entries = self.entries.write().await;
        let mut removed = 0;

        for (key, registration) in done {
            if entries.get(key) == Some(registration) {
                entries.remove(key);
                removed += 1;
            }
        }

        removed
    }

    // == Length ==
    /// Returns the number of registered keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    // == Is Empty ==
    /// Returns true if no key is registered.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
