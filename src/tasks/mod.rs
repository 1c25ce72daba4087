//! Background Tasks Module
//!
//! Contains background tasks that run periodically alongside the cache.
//!
//! # Tasks
//! - TTL Sweeper: Evicts expired cache entries in bounded batches

mod sweeper;

pub use sweeper::spawn_sweeper;
