//! Configuration Module
//!
//! Constructor-time tunables for the heap and the cache, loadable from
//! environment variables.

use std::env;
use std::time::Duration;

use crate::error::{CacheError, Result};

/// Sizing policy for the timeline heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Capacity reserved up front, and the floor used when compacting
    pub initial_capacity: usize,
    /// Capacity above which storage is compacted once it is also more
    /// than twice the live count
    pub compact_threshold: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 100,
            compact_threshold: 300,
        }
    }
}

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Timeline heap sizing
    pub heap: HeapConfig,
    /// Time between two sweeper ticks
    pub sweep_interval: Duration,
    /// Maximum number of expired entries evicted per sweeper tick
    pub sweep_batch_size: usize,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `HEAP_INITIAL_CAPACITY` - Initial heap capacity (default: 100)
    /// - `HEAP_COMPACT_THRESHOLD` - Capacity that triggers compaction (default: 300)
    /// - `SWEEP_INTERVAL_MS` - Sweeper period in milliseconds (default: 1000)
    /// - `SWEEP_BATCH_SIZE` - Evictions per sweeper tick (default: 30)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            heap: HeapConfig {
                initial_capacity: env_or("HEAP_INITIAL_CAPACITY", defaults.heap.initial_capacity),
                compact_threshold: env_or(
                    "HEAP_COMPACT_THRESHOLD",
                    defaults.heap.compact_threshold,
                ),
            },
            sweep_interval: Duration::from_millis(env_or(
                "SWEEP_INTERVAL_MS",
                defaults.sweep_interval.as_millis() as u64,
            )),
            sweep_batch_size: env_or("SWEEP_BATCH_SIZE", defaults.sweep_batch_size),
        }
    }

    // == Validate ==
    /// Rejects values the cache cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.heap.initial_capacity == 0 {
            return Err(CacheError::InvalidConfig(
                "heap initial_capacity must be > 0".to_string(),
            ));
        }
        if self.heap.compact_threshold < self.heap.initial_capacity {
            return Err(CacheError::InvalidConfig(format!(
                "heap compact_threshold ({}) must be >= initial_capacity ({})",
                self.heap.compact_threshold, self.heap.initial_capacity
            )));
        }
        if self.sweep_interval.is_zero() {
            return Err(CacheError::InvalidConfig(
                "sweep_interval must be > 0".to_string(),
            ));
        }
        if self.sweep_batch_size == 0 {
            return Err(CacheError::InvalidConfig(
                "sweep_batch_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            heap: HeapConfig::default(),
            sweep_interval: Duration::from_secs(1),
            sweep_batch_size: 30,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
