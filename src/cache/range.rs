//! Half-open byte ranges within an object's stream
//!
//! A [`SegmentRange`] identifies the contiguous slice `[start, end)` of a
//! logical object that one segment caches. Ranges for the same key never
//! overlap; the cache enforces that invariant, this type supplies the
//! interval arithmetic.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{CacheError, CacheResult};

/// Half-open byte interval `[start, end)` within one object's stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentRange {
    /// First byte offset covered by the range
    pub start: u64,
    /// One past the last byte offset covered by the range
    pub end: u64,
}

impl SegmentRange {
    /// Create a new range, validating that it is non-empty
    pub fn new(start: u64, end: u64) -> CacheResult<Self> {
        if start >= end {
            return Err(CacheError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Length of the range in bytes
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// A range constructed through [`SegmentRange::new`] is never empty;
    /// this exists for completeness of the interval API
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Check whether the given absolute offset falls inside the range
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset < self.end
    }

    /// Check whether two ranges share at least one byte
    pub fn intersects(&self, other: &SegmentRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// The overlapping sub-range, if any
    pub fn intersection(&self, other: &SegmentRange) -> Option<SegmentRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if start < end {
            Some(SegmentRange { start, end })
        } else {
            None
        }
    }

    /// Split the range into consecutive chunks of at most `max_len` bytes
    ///
    /// Used when covering a cache miss: a gap larger than the configured
    /// maximum segment size becomes several segments.
    pub fn chunks(&self, max_len: u64) -> Vec<SegmentRange> {
        assert!(max_len > 0, "chunk size must be positive");

        let mut chunks = Vec::new();
        let mut start = self.start;
        while start < self.end {
            let end = self.end.min(start + max_len);
            chunks.push(SegmentRange { start, end });
            start = end;
        }
        chunks
    }
}

impl fmt::Display for SegmentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_empty_ranges() {
        assert!(SegmentRange::new(0, 10).is_ok());
        assert!(SegmentRange::new(10, 10).is_err());
        assert!(SegmentRange::new(11, 10).is_err());
    }

    #[test]
    fn test_len_and_contains() {
        let range = SegmentRange::new(10, 20).unwrap();
        assert_eq!(range.len(), 10);
        assert!(range.contains(10));
        assert!(range.contains(19));
        assert!(!range.contains(20));
        assert!(!range.contains(9));
    }

    #[test]
    fn test_intersection() {
        let a = SegmentRange::new(0, 50).unwrap();
        let b = SegmentRange::new(40, 60).unwrap();
        let c = SegmentRange::new(50, 60).unwrap();

        assert!(a.intersects(&b));
        assert_eq!(
            a.intersection(&b),
            Some(SegmentRange { start: 40, end: 50 })
        );

        // Half-open: touching ranges do not intersect
        assert!(!a.intersects(&c));
        assert_eq!(a.intersection(&c), None);
    }

    #[test]
    fn test_chunks_exact_and_remainder() {
        let range = SegmentRange::new(0, 100).unwrap();

        let even = range.chunks(50);
        assert_eq!(even.len(), 2);
        assert_eq!(even[0], SegmentRange { start: 0, end: 50 });
        assert_eq!(even[1], SegmentRange { start: 50, end: 100 });

        let uneven = range.chunks(30);
        assert_eq!(uneven.len(), 4);
        assert_eq!(uneven[3], SegmentRange { start: 90, end: 100 });

        let single = range.chunks(1000);
        assert_eq!(single, vec![range]);
    }

    #[test]
    fn test_display() {
        let range = SegmentRange::new(128, 256).unwrap();
        assert_eq!(range.to_string(), "[128, 256)");
    }

    #[test]
    fn test_serde_round_trip() {
        let range = SegmentRange::new(0, 4096).unwrap();
        let toml = toml::to_string(&range).unwrap();
        let back: SegmentRange = toml::from_str(&toml).unwrap();
        assert_eq!(range, back);
    }
}
