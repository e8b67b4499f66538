//! File-segment cache for byte ranges of larger objects
//!
//! This module implements a local on-disk cache that tracks which byte
//! ranges of remote objects are already available, fills missing ranges
//! through exclusive writers, and shares both completed and in-progress
//! segments between concurrent consumers.
//!
//! # Key Features
//!
//! - **Range coverage**: one call covers any byte range with existing and
//!   newly created segments, gap-free and in order
//! - **Capacity reservations**: every append is charged against a fixed
//!   capacity before it happens, with bounded waits and LRU eviction under
//!   pressure
//! - **Explicit lifecycle**: segments move through a guarded state machine;
//!   a writer that fails or is dropped always settles its segment
//! - **Shared in-progress reads**: readers consume the growing prefix of a
//!   segment while its writer is still downloading
//!
//! # Module Organization
//!
//! - [`config`] - Configuration types and TOML loading
//! - [`key`] - Compact object identity
//! - [`range`] - Half-open byte intervals
//! - [`segment`] - Segment lifecycle and state machine
//! - [`holder`] - Scoped, pinned segment bundles
//! - [`file_cache`] - Registry, accounting, and eviction
//! - [`write_buffer`] - Exclusive segment writer
//! - [`reader`] - Bounded prefix reader
//! - [`path`] - Backing-file path derivation
//! - [`stats`] - Usage snapshots
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rangecache::cache::{CacheConfig, CacheKey, FileCache, SegmentRange, SegmentState};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CacheConfig::default().with_capacity(64 * 1024 * 1024);
//! let cache = Arc::new(FileCache::new(config).await?);
//!
//! let key = CacheKey::from_path("s3://bucket/part-0001.parquet");
//! let range = SegmentRange::new(0, 4096)?;
//!
//! let holder = cache.get_or_create(key, range).await?;
//! for segment in &holder {
//!     match segment.state() {
//!         SegmentState::Downloaded => {
//!             let mut reader = segment.reader().await?;
//!             let bytes = reader.read_to_end().await?;
//!             println!("cached: {} bytes", bytes.len());
//!         }
//!         SegmentState::Empty => {
//!             let mut writer = cache.writer(segment).await?;
//!             writer.write(&fetch_from_remote(segment.range())).await?;
//!             writer.finish().await?;
//!         }
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! # fn fetch_from_remote(range: SegmentRange) -> Vec<u8> { vec![0; range.len() as usize] }
//! ```

pub mod config;
pub mod file_cache;
pub mod holder;
pub mod key;
pub mod path;
pub mod range;
pub mod reader;
pub mod segment;
pub mod stats;
pub mod write_buffer;

#[cfg(test)]
pub mod tests;

// Re-export main public API
pub use config::{CacheConfig, RetryPolicy};
pub use file_cache::FileCache;
pub use holder::FileSegmentsHolder;
pub use key::CacheKey;
pub use path::SegmentPathResolver;
pub use range::SegmentRange;
pub use reader::SegmentReader;
pub use segment::{FileSegment, SegmentSnapshot, SegmentState};
pub use stats::{format_bytes, CacheStats};
pub use write_buffer::SegmentWriteBuffer;
