//! TTL Cache - an in-process key-value cache with per-entry expiry
//!
//! Set, get, delete and eviction all run in O(log n): a red-black tree
//! indexes entries by key and an indexed min-heap orders them by expiry.
//! Expired entries are evicted lazily on read and by a periodic sweeper.

pub mod algorithm;
pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::TtlCache;
pub use config::{CacheConfig, HeapConfig};
pub use error::{CacheError, Result};
pub use tasks::spawn_sweeper;
