//! Range Cache Library
//!
//! A local on-disk cache for byte ranges of larger (possibly remote)
//! objects, built for storage engines that want to avoid re-fetching
//! backing data. Provides concurrent range coverage, bounded-wait capacity
//! reservations, LRU eviction, and crash-safe segment finalization.

pub mod cache;
pub mod constants;
pub mod errors;
pub mod prelude;

// Re-export commonly used types for convenience
pub use cache::{CacheConfig, CacheKey, FileCache, FileSegmentsHolder, SegmentRange};
pub use errors::{CacheError, CacheResult};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_accessible() {
        assert!(constants::DEFAULT_CAPACITY > 0);
        assert!(constants::DEFAULT_MAX_SEGMENT_SIZE <= constants::DEFAULT_CAPACITY);
    }

    #[test]
    fn test_error_types() {
        let err = CacheError::CapacityExhausted {
            requested: 1,
            timeout: std::time::Duration::ZERO,
        };
        assert_eq!(err.category(), "capacity");
        assert!(err.is_recoverable());
    }
}
