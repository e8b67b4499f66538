//! Application constants for the range cache
//!
//! This module centralizes the defaults used throughout the crate, organized
//! by functional domain.

use std::time::Duration;

/// Cache sizing and reservation defaults
pub mod cache {
    use super::Duration;

    /// Default total cache capacity in bytes (1 GiB)
    pub const DEFAULT_CAPACITY: u64 = 1024 * 1024 * 1024;

    /// Default maximum size of a single segment in bytes (8 MiB)
    pub const DEFAULT_MAX_SEGMENT_SIZE: u64 = 8 * 1024 * 1024;

    /// Default bounded wait for capacity reservations
    pub const DEFAULT_RESERVATION_TIMEOUT: Duration = Duration::from_secs(10);

    /// Directory name used under the OS cache directory when no root is set
    pub const CACHE_DIR_NAME: &str = "rangecache";
}

/// On-disk layout constants
pub mod layout {
    /// Length of the hex prefix used as a fan-out directory level
    pub const KEY_PREFIX_LEN: usize = 3;
}

// Re-export the most commonly referenced defaults at module level
pub use cache::{DEFAULT_CAPACITY, DEFAULT_MAX_SEGMENT_SIZE, DEFAULT_RESERVATION_TIMEOUT};
