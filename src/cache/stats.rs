//! Cache statistics and usage monitoring
//!
//! A [`CacheStats`] value is a point-in-time snapshot assembled by
//! [`FileCache::stats`](super::FileCache::stats); it holds no live
//! references into the cache.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Point-in-time cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Cache root directory
    pub cache_root: PathBuf,
    /// Configured capacity in bytes
    pub capacity: u64,
    /// Bytes currently charged (completed data plus live reservations)
    pub used_size: u64,
    /// Number of segments currently registered
    pub segment_count: usize,
    /// Segments with an active writer
    pub downloading_count: usize,
    /// Segments pinned by at least one holder or writer
    pub pinned_count: usize,
    /// Requests fully covered by existing segments
    pub hits: u64,
    /// Requests that created at least one new segment
    pub misses: u64,
    /// Segments evicted to free capacity since construction
    pub evictions: u64,
    /// When the snapshot was taken
    pub collected_at: DateTime<Utc>,
}

impl CacheStats {
    /// Used capacity as a percentage of the configured total
    pub fn usage_percentage(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        (self.used_size as f64 / self.capacity as f64) * 100.0
    }

    /// Check if usage has crossed the given percentage threshold
    pub fn is_near_capacity(&self, threshold_percentage: f64) -> bool {
        self.usage_percentage() > threshold_percentage
    }

    /// Used size in human-readable form
    pub fn format_used(&self) -> String {
        format_bytes(self.used_size)
    }

    /// Capacity in human-readable form
    pub fn format_capacity(&self) -> String {
        format_bytes(self.capacity)
    }
}

/// Format a byte count using binary units
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
