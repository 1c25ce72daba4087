//! Cache Module
//!
//! Provides the in-memory TTL cache: an ordered index for lookups by key
//! and an expiry heap for finding and evicting the oldest entries.

mod entry;
mod stats;
mod store;


// Re-export public types
pub use entry::{current_timestamp_ns, expiry_after, CacheEntry};
pub use stats::CacheStats;
pub use store::TtlCache;
