//! Core cache registry with capacity accounting and LRU eviction
//!
//! [`FileCache`] maps `(key, byte range)` to segments, charges reservations
//! against a fixed capacity, and evicts least-recently-used unpinned segments
//! under pressure. All bookkeeping lives under one mutex held only for brief
//! critical sections; backing-file deletion always happens after the lock is
//! released.
//!
//! Lock order is cache state before segment state, never the reverse.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::constants::cache as cache_defaults;
use crate::errors::{CacheError, CacheResult};

use super::config::{CacheConfig, RetryPolicy};
use super::holder::FileSegmentsHolder;
use super::key::CacheKey;
use super::path::SegmentPathResolver;
use super::range::SegmentRange;
use super::segment::{FileSegment, FinalizeMode, SegmentState};
use super::stats::CacheStats;
use super::write_buffer::SegmentWriteBuffer;

/// Registry and accounting state, serialized under one lock
struct CacheState {
    /// Per-key segments ordered by range start; ranges never overlap
    files: HashMap<CacheKey, BTreeMap<u64, Arc<FileSegment>>>,
    /// Eviction queue, coldest at the front; insertion order breaks ties
    lru: VecDeque<(CacheKey, u64)>,
    /// Bytes charged: completed data plus live reservations
    used_size: u64,
}

/// Result of one locked reservation pass
enum ReserveAttempt {
    /// Capacity charged; victim files (if any) still need deleting
    Reserved(Vec<PathBuf>),
    /// Queue exhausted without enough space; wait for releases
    Wait(Vec<PathBuf>),
}

/// Local on-disk cache for byte ranges of larger objects
///
/// A long-lived, explicitly constructed instance, shared as
/// `Arc<FileCache>`. Consumers obtain coverage of a range through
/// [`FileCache::get_or_create`] and fill missing segments through
/// [`SegmentWriteBuffer`]s; capacity is enforced by reservation with
/// bounded waits and LRU eviction.
pub struct FileCache {
    config: CacheConfig,
    cache_root: PathBuf,
    state: Mutex<CacheState>,
    /// Wakes reservation waiters when pins drop or capacity is freed
    space_released: Notify,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl FileCache {
    /// Create a new cache rooted at the configured directory
    ///
    /// Creates the directory if needed and purges anything left behind by a
    /// previous process: stale partial files are never trusted or re-indexed,
    /// so accounting always starts from a consistent, empty state.
    pub async fn new(config: CacheConfig) -> CacheResult<Self> {
        config.validate().map_err(CacheError::Config)?;

        let cache_root = match &config.cache_root {
            Some(path) => path.clone(),
            None => Self::default_cache_dir()?,
        };

        tokio::fs::create_dir_all(&cache_root).await.map_err(|e| {
            error!("Failed to create cache directory: {}", e);
            CacheError::DirectoryNotAccessible {
                path: cache_root.clone(),
            }
        })?;

        Self::purge_stale_entries(&cache_root).await;

        info!(
            root = %cache_root.display(),
            capacity = config.capacity,
            "Initialized range cache"
        );

        Ok(Self {
            config,
            cache_root,
            state: Mutex::new(CacheState {
                files: HashMap::new(),
                lru: VecDeque::new(),
                used_size: 0,
            }),
            space_released: Notify::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    /// Cache root directory
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Cache configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Configured capacity in bytes
    pub fn capacity(&self) -> u64 {
        self.config.capacity
    }

    /// Bytes currently charged against the capacity
    pub fn used_size(&self) -> u64 {
        self.lock_state().used_size
    }

    /// Default OS-specific cache directory
    fn default_cache_dir() -> CacheResult<PathBuf> {
        let dir = dirs::cache_dir()
            .ok_or_else(|| CacheError::DirectoryNotAccessible {
                path: PathBuf::from("system cache directory"),
            })?
            .join(cache_defaults::CACHE_DIR_NAME);
        Ok(dir)
    }

    /// Remove everything under the cache root left by a previous process
    async fn purge_stale_entries(cache_root: &Path) {
        let root = cache_root.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let entries = match std::fs::read_dir(&root) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Failed to scan cache directory for stale entries: {}", e);
                    return;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let result = if path.is_dir() {
                    std::fs::remove_dir_all(&path)
                } else {
                    std::fs::remove_file(&path)
                };
                if let Err(e) = result {
                    warn!("Failed to purge stale cache entry {}: {}", path.display(), e);
                } else {
                    debug!("Purged stale cache entry: {}", path.display());
                }
            }
        })
        .await
        .unwrap_or_else(|e| warn!("Stale-entry purge task failed: {}", e));
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().expect("cache state lock poisoned")
    }

    /// Cover `range` with segments, creating Empty ones for every gap
    ///
    /// Returns a holder over all segments spanning the request, existing and
    /// new, in ascending offset order with no gaps or overlaps between
    /// them. Every returned segment is pinned for the holder's lifetime.
    /// Gaps larger than `max_segment_size` become several segments. Failed
    /// segments encountered here are retried per the configured
    /// [`RetryPolicy`] when nothing else references them.
    pub async fn get_or_create(
        self: &Arc<Self>,
        key: CacheKey,
        range: SegmentRange,
    ) -> CacheResult<FileSegmentsHolder> {
        let mut stale_files = Vec::new();

        let segments = {
            let mut state = self.lock_state();

            // Existing segments overlapping the request, in ascending order.
            // The predecessor by start offset may still overhang into it.
            let mut overlapping: Vec<Arc<FileSegment>> = Vec::new();
            if let Some(map) = state.files.get(&key) {
                if let Some((_, segment)) = map.range(..range.start).next_back() {
                    if segment.range().end > range.start {
                        overlapping.push(Arc::clone(segment));
                    }
                }
                overlapping.extend(map.range(range.start..range.end).map(|(_, s)| Arc::clone(s)));
            }

            let mut covering: Vec<Arc<FileSegment>> = Vec::new();
            let mut cursor = range.start;
            let mut created = 0usize;

            for segment in overlapping {
                let segment = if segment.state() == SegmentState::Errored
                    && segment.pin_count() == 0
                {
                    self.retry_failed_segment(&mut state, segment, &mut stale_files, &mut created)
                } else {
                    segment
                };

                if segment.range().start > cursor {
                    let gap = SegmentRange {
                        start: cursor,
                        end: segment.range().start,
                    };
                    for chunk in gap.chunks(self.config.max_segment_size) {
                        covering.push(self.insert_segment(&mut state, key, chunk));
                        created += 1;
                    }
                }
                cursor = cursor.max(segment.range().end);
                covering.push(segment);
            }

            if cursor < range.end {
                let gap = SegmentRange {
                    start: cursor,
                    end: range.end,
                };
                for chunk in gap.chunks(self.config.max_segment_size) {
                    covering.push(self.insert_segment(&mut state, key, chunk));
                    created += 1;
                }
            }

            for segment in &covering {
                segment.pin();
                Self::touch_lru(&mut state, key, segment.range().start);
            }

            if created == 0 {
                self.hits.fetch_add(1, Ordering::Relaxed);
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
            debug!(
                key = %key,
                range = %range,
                segments = covering.len(),
                created,
                "Covered range request"
            );

            covering
        };

        self.delete_files(stale_files).await;

        Ok(FileSegmentsHolder::new(Arc::clone(self), key, range, segments))
    }

    /// Apply the retry policy to an unpinned Errored segment
    fn retry_failed_segment(
        &self,
        state: &mut CacheState,
        segment: Arc<FileSegment>,
        stale_files: &mut Vec<PathBuf>,
        created: &mut usize,
    ) -> Arc<FileSegment> {
        match self.config.retry_policy {
            RetryPolicy::ResetInPlace => match segment.reset() {
                Ok(effect) => {
                    state.used_size = state.used_size.saturating_sub(effect.freed);
                    stale_files.push(segment.path().to_path_buf());
                    debug!(key = %segment.key(), range = %segment.range(), "Reset failed segment for retry");
                    segment
                }
                Err(e) => {
                    warn!(key = %segment.key(), range = %segment.range(), "Could not reset failed segment: {}", e);
                    segment
                }
            },
            RetryPolicy::Reallocate => {
                let key = segment.key();
                let start = segment.range().start;
                Self::remove_entry(state, &key, start);
                state.used_size = state.used_size.saturating_sub(segment.reserved_size());
                stale_files.push(segment.path().to_path_buf());
                *created += 1;
                debug!(key = %key, range = %segment.range(), "Replaced failed segment with a fresh one");
                self.insert_segment(state, key, segment.range())
            }
        }
    }

    /// Register a brand-new Empty segment for `range`
    fn insert_segment(
        &self,
        state: &mut CacheState,
        key: CacheKey,
        range: SegmentRange,
    ) -> Arc<FileSegment> {
        let path = SegmentPathResolver::segment_path(&self.cache_root, &key, range.start);
        let segment = Arc::new(FileSegment::new(key, range, path));
        state
            .files
            .entry(key)
            .or_default()
            .insert(range.start, Arc::clone(&segment));
        state.lru.push_back((key, range.start));
        segment
    }

    fn remove_entry(state: &mut CacheState, key: &CacheKey, start: u64) {
        if let Some(map) = state.files.get_mut(key) {
            map.remove(&start);
            if map.is_empty() {
                state.files.remove(key);
            }
        }
        if let Some(pos) = state.lru.iter().position(|entry| entry == &(*key, start)) {
            let _ = state.lru.remove(pos);
        }
    }

    fn touch_lru(state: &mut CacheState, key: CacheKey, start: u64) {
        if let Some(pos) = state.lru.iter().position(|entry| entry == &(key, start)) {
            let _ = state.lru.remove(pos);
        }
        state.lru.push_back((key, start));
    }

    /// Attach an exclusive writer to a segment from one of this cache's
    /// holders
    pub async fn writer(
        self: &Arc<Self>,
        segment: &Arc<FileSegment>,
    ) -> CacheResult<SegmentWriteBuffer> {
        SegmentWriteBuffer::attach(Arc::clone(self), Arc::clone(segment)).await
    }

    /// Try to charge `size` additional bytes against the capacity
    ///
    /// Evicts least-recently-used unpinned, non-downloading segments until
    /// enough space is free, then waits (bounded by `timeout`) for pins to
    /// drop if the queue is exhausted. Returns `Ok(false)` when the timeout
    /// elapses first; a zero timeout makes exactly one pass and never
    /// blocks. Bookkeeping happens under the cache lock; victim files are
    /// deleted after it is released.
    pub async fn try_reserve(
        &self,
        segment: &FileSegment,
        size: u64,
        timeout: Duration,
    ) -> CacheResult<bool> {
        if size == 0 {
            return Ok(true);
        }
        if size > self.config.capacity {
            warn!(
                requested = size,
                capacity = self.config.capacity,
                "Reservation larger than total capacity"
            );
            return Ok(false);
        }

        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register for wakeups before the locked attempt so a release
            // happening right after it cannot be missed.
            let notified = self.space_released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.reserve_or_evict(segment, size) {
                ReserveAttempt::Reserved(victims) => {
                    self.delete_files(victims).await;
                    return Ok(true);
                }
                ReserveAttempt::Wait(victims) => {
                    self.delete_files(victims).await;
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        debug!(requested = size, "Reservation timed out");
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// One locked pass: evict what the LRU queue allows, then charge if
    /// space permits
    fn reserve_or_evict(&self, segment: &FileSegment, size: u64) -> ReserveAttempt {
        let mut state = self.lock_state();
        let mut victim_files = Vec::new();

        if state.used_size + size > self.config.capacity {
            let mut index = 0;
            while state.used_size + size > self.config.capacity && index < state.lru.len() {
                let (key, start) = state.lru[index];
                let candidate = state
                    .files
                    .get(&key)
                    .and_then(|map| map.get(&start))
                    .cloned();

                match candidate {
                    None => {
                        // Stale queue entry for an already-removed segment
                        let _ = state.lru.remove(index);
                    }
                    Some(victim) if victim.is_evictable() => {
                        let freed = victim.reserved_size();
                        let _ = state.lru.remove(index);
                        if let Some(map) = state.files.get_mut(&key) {
                            map.remove(&start);
                            if map.is_empty() {
                                state.files.remove(&key);
                            }
                        }
                        state.used_size = state.used_size.saturating_sub(freed);
                        victim_files.push(victim.path().to_path_buf());
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                        debug!(key = %key, start, freed, "Evicted segment");
                    }
                    Some(_) => {
                        index += 1;
                    }
                }
            }
        }

        if state.used_size + size <= self.config.capacity {
            state.used_size += size;
            segment.add_reserved(size);
            ReserveAttempt::Reserved(victim_files)
        } else {
            ReserveAttempt::Wait(victim_files)
        }
    }

    /// Release one holder/writer reference to a segment
    ///
    /// Synchronous so it can run from `Drop`; at zero pins the segment
    /// becomes eligible for eviction and capacity waiters are woken.
    pub(crate) fn release(&self, segment: &FileSegment) {
        let remaining = segment.unpin();
        if remaining == 0 {
            self.space_released.notify_waiters();
        }
    }

    /// Return a reservation whose append never happened
    pub(crate) fn release_reservation(&self, segment: &FileSegment, bytes: u64) {
        {
            let mut state = self.lock_state();
            state.used_size = state.used_size.saturating_sub(bytes);
        }
        segment.sub_reserved(bytes);
        self.space_released.notify_waiters();
    }

    /// Settle a segment after its writer finished and square the accounting
    ///
    /// Synchronous so the write buffer's drop path can call it; the only
    /// I/O is deleting a file that held nothing usable.
    pub(crate) fn finalize_segment(
        &self,
        segment: &FileSegment,
        mode: FinalizeMode,
    ) -> CacheResult<SegmentState> {
        let effect = segment.complete(mode)?;

        if effect.freed > 0 {
            let mut state = self.lock_state();
            state.used_size = state.used_size.saturating_sub(effect.freed);
        }
        if effect.remove_file {
            remove_file_quietly(segment.path());
        }
        self.space_released.notify_waiters();

        debug!(key = %segment.key(), range = %segment.range(), state = %effect.state, "Finalized segment");
        Ok(effect.state)
    }

    /// Discard a failed segment's content and return it to Empty for retry
    pub async fn reset_segment(&self, segment: &FileSegment) -> CacheResult<()> {
        let effect = segment.reset()?;
        if effect.freed > 0 {
            let mut state = self.lock_state();
            state.used_size = state.used_size.saturating_sub(effect.freed);
        }
        let _ = tokio::fs::remove_file(segment.path()).await;
        self.space_released.notify_waiters();
        Ok(())
    }

    /// Delete a segment's backing file and cache entry
    ///
    /// Only valid when nothing references the segment and no writer is
    /// active.
    pub async fn remove(&self, segment: &FileSegment) -> CacheResult<()> {
        {
            let mut state = self.lock_state();

            // Checked under the cache lock: pinning also happens there, so
            // no holder can appear between the check and the removal.
            if segment.pin_count() != 0 {
                return Err(CacheError::RemovalDenied {
                    key: segment.key(),
                    range: segment.range(),
                    reason: "segment is pinned".to_string(),
                });
            }
            if segment.state() == SegmentState::Downloading {
                return Err(CacheError::RemovalDenied {
                    key: segment.key(),
                    range: segment.range(),
                    reason: "segment is downloading".to_string(),
                });
            }

            let key = segment.key();
            Self::remove_entry(&mut state, &key, segment.range().start);
            state.used_size = state.used_size.saturating_sub(segment.reserved_size());
        }

        match tokio::fs::remove_file(segment.path()).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.space_released.notify_waiters();

        debug!(key = %segment.key(), range = %segment.range(), "Removed segment");
        Ok(())
    }

    /// Look up the segment starting exactly at `start`, without pinning it
    pub fn get_segment(&self, key: &CacheKey, start: u64) -> Option<Arc<FileSegment>> {
        let state = self.lock_state();
        state.files.get(key).and_then(|map| map.get(&start)).cloned()
    }

    /// Point-in-time statistics snapshot
    pub fn stats(&self) -> CacheStats {
        let state = self.lock_state();

        let mut segment_count = 0;
        let mut downloading_count = 0;
        let mut pinned_count = 0;
        for map in state.files.values() {
            for segment in map.values() {
                segment_count += 1;
                if segment.state() == SegmentState::Downloading {
                    downloading_count += 1;
                }
                if segment.pin_count() > 0 {
                    pinned_count += 1;
                }
            }
        }

        CacheStats {
            cache_root: self.cache_root.clone(),
            capacity: self.config.capacity,
            used_size: state.used_size,
            segment_count,
            downloading_count,
            pinned_count,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            collected_at: Utc::now(),
        }
    }

    async fn delete_files(&self, paths: Vec<PathBuf>) {
        for path in paths {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to delete segment file {}: {}", path.display(), e),
            }
        }
    }
}

impl std::fmt::Debug for FileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("FileCache")
            .field("cache_root", &self.cache_root)
            .field("capacity", &self.config.capacity)
            .field("used_size", &state.used_size)
            .field("keys", &state.files.len())
            .finish()
    }
}

/// Best-effort deletion usable from drop paths
fn remove_file_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to delete segment file {}: {}", path.display(), e),
    }
}
