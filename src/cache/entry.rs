//! Cache Entry Module
//!
//! Defines the payload stored in the timeline heap for each key.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

// == Cache Entry ==
/// A cached value together with its absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// Expiration instant (Unix nanoseconds)
    pub expires_at: i64,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates an entry expiring at the given Unix-nanosecond instant.
    pub fn new(value: V, expires_at: i64) -> Self {
        Self { value, expires_at }
    }

    /// Creates an entry expiring `ttl` from now.
    pub fn with_ttl(value: V, ttl: Duration) -> Self {
        Self::new(value, expiry_after(ttl))
    }

    // == Is Expired ==
    /// Checks whether the entry has expired at `now`.
    ///
    /// Boundary condition: an entry is expired once `now >= expires_at`.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }

    /// Checks whether the entry has expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ns())
    }
}

// == Utility Functions ==
/// Returns the current Unix timestamp in nanoseconds.
pub fn current_timestamp_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Absolute expiry `ttl` from now, saturating at `i64::MAX`.
pub fn expiry_after(ttl: Duration) -> i64 {
    let ttl_ns = i64::try_from(ttl.as_nanos()).unwrap_or(i64::MAX);
    current_timestamp_ns().saturating_add(ttl_ns)
}
