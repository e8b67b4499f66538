//! Backing-file path derivation
//!
//! Every segment owns exactly one backing file whose location is derived
//! deterministically from `(key, range.start)`:
//!
//! ```text
//! {cache_root}/{key_hex[..3]}/{key_hex}/{range.start}
//! ```
//!
//! The short hex prefix fans keys out across directories so one directory
//! never accumulates every object. Because files are never shared between
//! segments, eviction reduces to deleting one file.

use std::path::{Path, PathBuf};

use crate::constants::layout;

use super::key::CacheKey;

/// Path derivation for segment backing files
pub struct SegmentPathResolver;

impl SegmentPathResolver {
    /// Directory holding all of one object's segment files
    pub fn key_dir(cache_root: &Path, key: &CacheKey) -> PathBuf {
        let hex = key.to_hex();
        cache_root
            .join(&hex[..layout::KEY_PREFIX_LEN])
            .join(&hex)
    }

    /// Backing file path for the segment starting at `start`
    pub fn segment_path(cache_root: &Path, key: &CacheKey, start: u64) -> PathBuf {
        Self::key_dir(cache_root, key).join(start.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_paths() {
        let root = PathBuf::from("/cache");
        let key = CacheKey::from_hex("50c9d1c465f3cbff652be1509c2e2a4e").unwrap();

        let path = SegmentPathResolver::segment_path(&root, &key, 4096);
        assert_eq!(
            path,
            PathBuf::from("/cache/50c/50c9d1c465f3cbff652be1509c2e2a4e/4096")
        );

        // Same inputs, same path
        assert_eq!(path, SegmentPathResolver::segment_path(&root, &key, 4096));
    }

    #[test]
    fn test_segments_of_one_key_share_a_directory() {
        let root = PathBuf::from("/cache");
        let key = CacheKey::from_path("s3://bucket/object");

        let a = SegmentPathResolver::segment_path(&root, &key, 0);
        let b = SegmentPathResolver::segment_path(&root, &key, 8192);

        assert_ne!(a, b);
        assert_eq!(a.parent(), b.parent());
        assert_eq!(a.parent().unwrap(), SegmentPathResolver::key_dir(&root, &key));
    }

    #[test]
    fn test_distinct_keys_do_not_collide() {
        let root = PathBuf::from("/cache");
        let a = CacheKey::from_path("object-a");
        let b = CacheKey::from_path("object-b");

        assert_ne!(
            SegmentPathResolver::segment_path(&root, &a, 0),
            SegmentPathResolver::segment_path(&root, &b, 0)
        );
    }
}
