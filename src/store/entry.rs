//! Entry Metadata Module
//!
//! On-disk metadata of a stored entry, used to decide TTL expiry.

use std::fs::Metadata;
use std::io;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

// == Entry Meta ==
/// Creation time and size of an entry's value file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntryMeta {
    /// When the value file was written
    pub created_at: DateTime<Utc>,
    /// Size of the serialized value in bytes
    pub size: u64,
}

impl EntryMeta {
    // == Constructor ==
    /// Builds metadata from the value file's filesystem metadata.
    ///
    /// Uses the creation time where the platform reports one. Otherwise falls
    /// back to the modification time, which for a write-once value file is the
    /// same instant.
    pub fn from_metadata(meta: &Metadata) -> io::Result<Self> {
        let created = meta.created().or_else(|_| meta.modified())?;

        Ok(Self {
            created_at: DateTime::<Utc>::from(created),
            size: meta.len(),
        })
    }

    // == Expires At ==
    /// Returns the instant a TTL of `ttl_secs` runs out, or None if it is
    /// beyond the representable range.
    pub fn expires_at(&self, ttl_secs: u64) -> Option<DateTime<Utc>> {
        let ttl = Duration::try_seconds(i64::try_from(ttl_secs).ok()?)?;
        self.created_at.checked_add_signed(ttl)
    }

    // == Is Expired ==
    /// Checks whether a TTL of `ttl_secs` has elapsed at `now`.
    ///
    /// Boundary condition: the entry is expired once the elapsed time is
    /// greater than or equal to the TTL.
    pub fn is_expired(&self, ttl_secs: u64, now: DateTime<Utc>) -> bool {
        match self.expires_at(ttl_secs) {
            Some(expires) => now >= expires,
            None => false,
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn meta_at(created_at: DateTime<Utc>) -> EntryMeta {
        EntryMeta {
            created_at,
            size: 42,
        }
    }

    #[test]
    fn test_not_expired_before_ttl() {
        let now = Utc::now();
        let meta = meta_at(now - Duration::seconds(3));

        assert!(!meta.is_expired(5, now));
    }

    #[test]
    fn test_expired_after_ttl() {
        let now = Utc::now();
        let meta = meta_at(now - Duration::seconds(7));

        assert!(meta.is_expired(5, now));
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let now = Utc::now();
        let meta = meta_at(now - Duration::seconds(5));

        // Elapsed time equal to the TTL counts as expired
        assert!(meta.is_expired(5, now), "Entry should be expired at boundary");
    }

    #[test]
    fn test_huge_ttl_never_expires() {
        let now = Utc::now();
        let meta = meta_at(now - Duration::days(365));

        assert!(meta.expires_at(u64::MAX).is_none());
        assert!(!meta.is_expired(u64::MAX, now));
    }

    #[test]
    fn test_serializes_creation_time_as_rfc3339() {
        let created_at = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let value = serde_json::to_value(meta_at(created_at)).unwrap();
        assert_eq!(value["created_at"], "2024-05-01T10:00:00Z");
        assert_eq!(value["size"], 42);
    }

    #[test]
    fn test_from_file_metadata() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("value.json");
        std::fs::write(&path, b"{\"a\":1}").unwrap();

        let meta = EntryMeta::from_metadata(&std::fs::metadata(&path).unwrap()).unwrap();
        assert_eq!(meta.size, 7);
        assert!(Utc::now() - meta.created_at < Duration::seconds(60));
    }
}
