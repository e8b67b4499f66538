//! Scoped bundle of segment references for one logical operation
//!
//! A [`FileSegmentsHolder`] is the unit a consumer receives from
//! [`FileCache::get_or_create`](super::FileCache::get_or_create). Every
//! segment in it is pinned: it can be neither evicted nor deleted while the
//! holder lives. The pins are released in one pass when the holder is
//! dropped, on success, failure, and unwind alike, so call sites never
//! need explicit release calls.

use std::sync::Arc;

use super::file_cache::FileCache;
use super::key::CacheKey;
use super::range::SegmentRange;
use super::segment::FileSegment;

/// Ordered, pinned segment references covering one requested range
///
/// Iteration yields segments in ascending offset order with no gaps or
/// overlaps between them. The first segment may start before the requested
/// range and the last may end after it; the holder records the requested
/// window so consumers can trim.
#[derive(Debug)]
pub struct FileSegmentsHolder {
    cache: Arc<FileCache>,
    key: CacheKey,
    requested: SegmentRange,
    segments: Vec<Arc<FileSegment>>,
}

impl FileSegmentsHolder {
    pub(crate) fn new(
        cache: Arc<FileCache>,
        key: CacheKey,
        requested: SegmentRange,
        segments: Vec<Arc<FileSegment>>,
    ) -> Self {
        debug_assert!(
            segments
                .windows(2)
                .all(|pair| pair[0].range().end == pair[1].range().start),
            "holder segments must be contiguous"
        );

        Self {
            cache,
            key,
            requested,
            segments,
        }
    }

    /// Key of the object the segments belong to
    pub fn key(&self) -> CacheKey {
        self.key
    }

    /// The range the consumer asked for
    pub fn requested_range(&self) -> SegmentRange {
        self.requested
    }

    /// Pinned segments in ascending offset order
    pub fn segments(&self) -> &[Arc<FileSegment>] {
        &self.segments
    }

    /// Number of segments covering the request
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// A holder over a valid range always has at least one segment
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Iterate the segments in ascending offset order
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<FileSegment>> {
        self.segments.iter()
    }
}

impl<'a> IntoIterator for &'a FileSegmentsHolder {
    type Item = &'a Arc<FileSegment>;
    type IntoIter = std::slice::Iter<'a, Arc<FileSegment>>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.iter()
    }
}

impl Drop for FileSegmentsHolder {
    fn drop(&mut self) {
        for segment in &self.segments {
            self.cache.release(segment);
        }
    }
}

impl std::fmt::Display for FileSegmentsHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "holder {}@{} ({} segments)",
            self.key,
            self.requested,
            self.segments.len()
        )
    }
}
