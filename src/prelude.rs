//! Prelude module for the range cache
//!
//! Re-exports the items needed for typical usage, so one
//! `use rangecache::prelude::*;` brings in the whole working set.
//!
//! # Usage
//!
//! ```rust,no_run
//! use rangecache::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> CacheResult<()> {
//!     let cache = Arc::new(FileCache::new(CacheConfig::default()).await?);
//!
//!     let key = CacheKey::from_path("s3://bucket/object");
//!     let holder = cache.get_or_create(key, SegmentRange::new(0, 4096)?).await?;
//!
//!     // Continue with fill or read...
//!     Ok(())
//! }
//! ```

// Core result types
pub use crate::errors::{CacheError, CacheResult, ConfigError};

// Essential cache components
pub use crate::cache::{
    CacheConfig, CacheKey, CacheStats, FileCache, FileSegment, FileSegmentsHolder, RetryPolicy,
    SegmentRange, SegmentReader, SegmentState, SegmentWriteBuffer,
};

// Commonly used constants
pub use crate::constants::{
    DEFAULT_CAPACITY, DEFAULT_MAX_SEGMENT_SIZE, DEFAULT_RESERVATION_TIMEOUT,
};

// Standard library re-exports that are commonly needed
pub use std::path::{Path, PathBuf};
pub use std::sync::Arc;
pub use std::time::Duration;
