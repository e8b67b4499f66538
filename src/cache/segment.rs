//! File segment lifecycle and state machine
//!
//! A [`FileSegment`] is one contiguous cached byte range of a logical object,
//! backed by exactly one file on disk. Its lifecycle is an explicit state
//! machine with guarded transitions:
//!
//! ```text
//! Empty -> Downloading -> { Downloaded | PartiallyDownloaded | Errored }
//! PartiallyDownloaded | Errored -> Empty   (explicit reset for retry)
//! ```
//!
//! Mutation happens only through the current exclusive writer (via
//! [`SegmentWriteBuffer`](super::write_buffer::SegmentWriteBuffer)) or through
//! cache-level eviction and removal. Readers never mutate a segment; they see
//! a consistent written prefix bounded at acquisition time.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::debug;

use crate::errors::{CacheError, CacheResult};

use super::key::CacheKey;
use super::range::SegmentRange;
use super::reader::SegmentReader;

/// Lifecycle state of a file segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Created on a cache miss; no writer attached, nothing downloaded
    Empty,
    /// An exclusive writer is filling the segment
    Downloading,
    /// The full declared range was written and durably flushed
    Downloaded,
    /// The writer stopped early; a valid prefix remains readable
    PartiallyDownloaded,
    /// The write failed with nothing usable on disk
    Errored,
}

impl SegmentState {
    /// Check whether the state machine permits moving to `next`
    pub fn can_transition_to(self, next: SegmentState) -> bool {
        use SegmentState::*;
        matches!(
            (self, next),
            (Empty, Downloading)
                | (Downloading, Downloaded)
                | (Downloading, PartiallyDownloaded)
                | (Downloading, Errored)
                | (PartiallyDownloaded, Empty)
                | (Errored, Empty)
        )
    }

    /// A writer finished with this segment, successfully or not
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SegmentState::Downloaded | SegmentState::PartiallyDownloaded | SegmentState::Errored
        )
    }

    /// Segment ended in a failed state and may be reset for retry
    pub fn is_failed(self) -> bool {
        matches!(
            self,
            SegmentState::PartiallyDownloaded | SegmentState::Errored
        )
    }

    /// State name for logs and error messages
    pub fn name(self) -> &'static str {
        match self {
            SegmentState::Empty => "Empty",
            SegmentState::Downloading => "Downloading",
            SegmentState::Downloaded => "Downloaded",
            SegmentState::PartiallyDownloaded => "PartiallyDownloaded",
            SegmentState::Errored => "Errored",
        }
    }
}

impl std::fmt::Display for SegmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Point-in-time view of a segment's progress, published to readers
#[derive(Debug, Clone, Copy)]
pub struct SegmentSnapshot {
    /// State at snapshot time
    pub state: SegmentState,
    /// Bytes committed to the backing file at snapshot time
    pub downloaded: u64,
}

/// How a writer's session over a segment ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FinalizeMode {
    /// Normal completion; becomes Downloaded only if the range is fully written
    Success,
    /// The writer failed or was dropped; the committed prefix stays readable
    Abort,
    /// Storage failure; nothing on disk can be trusted
    Discard,
}

/// Bookkeeping the cache must apply after a finalize or reset
#[derive(Debug, Clone, Copy)]
pub(crate) struct CompletionEffect {
    /// Reserved bytes no longer backed by data; subtract from `used_size`
    pub freed: u64,
    /// The backing file holds no usable data and should be deleted
    pub remove_file: bool,
    /// State the segment ended in
    pub state: SegmentState,
}

/// Mutable portion of a segment, serialized under one lock
#[derive(Debug)]
struct SegmentInner {
    state: SegmentState,
    /// Bytes committed to the backing file
    downloaded: u64,
    /// Bytes charged against the cache's `used_size` for this segment
    reserved: u64,
    /// Whether an exclusive writer currently owns the segment
    writer_attached: bool,
}

/// A contiguous cached byte range of one logical object
///
/// Created by the cache on a miss; shared between holders, writers, and
/// readers as `Arc<FileSegment>`. The pin count tracks holder references and
/// keeps the segment out of eviction; it is maintained by the cache, never
/// by consumers directly.
#[derive(Debug)]
pub struct FileSegment {
    key: CacheKey,
    range: SegmentRange,
    path: PathBuf,
    created_at: DateTime<Utc>,
    inner: Mutex<SegmentInner>,
    progress: watch::Sender<SegmentSnapshot>,
    pins: AtomicUsize,
}

impl FileSegment {
    /// Create a new Empty segment backed by `path`
    pub(crate) fn new(key: CacheKey, range: SegmentRange, path: PathBuf) -> Self {
        let initial = SegmentSnapshot {
            state: SegmentState::Empty,
            downloaded: 0,
        };
        let (progress, _) = watch::channel(initial);

        Self {
            key,
            range,
            path,
            created_at: Utc::now(),
            inner: Mutex::new(SegmentInner {
                state: SegmentState::Empty,
                downloaded: 0,
                reserved: 0,
                writer_attached: false,
            }),
            progress,
            pins: AtomicUsize::new(0),
        }
    }

    /// Key of the object this segment belongs to
    pub fn key(&self) -> CacheKey {
        self.key
    }

    /// Byte range this segment covers within the object
    pub fn range(&self) -> SegmentRange {
        self.range
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// When the segment was created
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current lifecycle state
    pub fn state(&self) -> SegmentState {
        self.lock().state
    }

    /// Bytes committed to the backing file so far
    pub fn downloaded_size(&self) -> u64 {
        self.lock().downloaded
    }

    /// Bytes currently charged against the cache for this segment
    pub fn reserved_size(&self) -> u64 {
        self.lock().reserved
    }

    /// Consistent state + progress snapshot
    pub fn snapshot(&self) -> SegmentSnapshot {
        let inner = self.lock();
        SegmentSnapshot {
            state: inner.state,
            downloaded: inner.downloaded,
        }
    }

    /// Number of live holder/writer references
    pub fn pin_count(&self) -> usize {
        self.pins.load(Ordering::Acquire)
    }

    /// Subscribe to progress updates (state changes and committed bytes)
    pub fn subscribe(&self) -> watch::Receiver<SegmentSnapshot> {
        self.progress.subscribe()
    }

    /// Wait until at least `len` bytes are committed, the segment reaches a
    /// terminal state, or `timeout` elapses
    ///
    /// Returns the committed byte count at the time the wait ended. Callers
    /// that only want the already-written prefix should use
    /// [`FileSegment::reader`] instead and skip the wait.
    pub async fn wait_for_downloaded(&self, len: u64, timeout: Duration) -> CacheResult<u64> {
        let mut rx = self.progress.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let snapshot = *rx.borrow_and_update();
            if snapshot.downloaded >= len || snapshot.state.is_terminal() {
                return Ok(snapshot.downloaded);
            }

            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => continue,
                // Sender dropped: the segment is gone, report what we saw
                Ok(Err(_)) => return Ok(snapshot.downloaded),
                Err(_) => return Err(CacheError::WaitTimeout { timeout }),
            }
        }
    }

    /// Open a reader over the prefix written so far
    ///
    /// The reader is bounded by `downloaded_size` at acquisition time and
    /// stays valid while the writer keeps appending. Errored segments hold
    /// no readable data.
    pub async fn reader(&self) -> CacheResult<SegmentReader> {
        self.reader_at(0).await
    }

    /// Open a reader starting `skip` bytes into the segment
    ///
    /// Used when a holder's first segment starts before the requested range.
    pub async fn reader_at(&self, skip: u64) -> CacheResult<SegmentReader> {
        let snapshot = self.snapshot();
        if snapshot.state == SegmentState::Errored {
            return Err(CacheError::SegmentErrored {
                key: self.key,
                range: self.range,
            });
        }

        let limit = snapshot.downloaded.saturating_sub(skip);
        SegmentReader::open(&self.path, self.range.start + skip, skip, limit).await
    }

    // ---- crate-internal mutation, driven by the cache and the write buffer ----

    fn lock(&self) -> std::sync::MutexGuard<'_, SegmentInner> {
        self.inner.lock().expect("segment lock poisoned")
    }

    fn publish(&self, inner: &SegmentInner) {
        self.progress.send_replace(SegmentSnapshot {
            state: inner.state,
            downloaded: inner.downloaded,
        });
    }

    /// Guarded state transition; rejects anything outside the state machine
    fn transition(&self, inner: &mut SegmentInner, next: SegmentState) -> CacheResult<()> {
        if !inner.state.can_transition_to(next) {
            return Err(CacheError::InvalidStateTransition {
                from: inner.state.name().to_string(),
                to: next.name().to_string(),
            });
        }
        debug!(
            key = %self.key,
            range = %self.range,
            from = inner.state.name(),
            to = next.name(),
            "segment state transition"
        );
        inner.state = next;
        Ok(())
    }

    /// Increment the pin count (a holder or writer now references us)
    pub(crate) fn pin(&self) -> usize {
        self.pins.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement the pin count, returning the remaining pins
    pub(crate) fn unpin(&self) -> usize {
        let previous = self.pins.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "unpin without matching pin");
        previous - 1
    }

    /// Take exclusive writer status: Empty -> Downloading
    pub(crate) fn attach_writer(&self) -> CacheResult<()> {
        let mut inner = self.lock();
        if inner.writer_attached {
            return Err(CacheError::WriterConflict {
                key: self.key,
                range: self.range,
            });
        }
        self.transition(&mut inner, SegmentState::Downloading)?;
        inner.writer_attached = true;
        self.publish(&inner);
        Ok(())
    }

    /// Record a capacity reservation granted by the cache
    pub(crate) fn add_reserved(&self, bytes: u64) {
        let mut inner = self.lock();
        inner.reserved += bytes;
    }

    /// Roll back a reservation whose append never happened
    pub(crate) fn sub_reserved(&self, bytes: u64) {
        let mut inner = self.lock();
        debug_assert!(inner.reserved >= bytes, "reservation underflow");
        inner.reserved = inner.reserved.saturating_sub(bytes);
    }

    /// Commit `bytes` appended by the active writer
    pub(crate) fn advance(&self, bytes: u64) -> CacheResult<()> {
        let mut inner = self.lock();
        if inner.state != SegmentState::Downloading || !inner.writer_attached {
            return Err(CacheError::InvalidStateTransition {
                from: inner.state.name().to_string(),
                to: "Downloading".to_string(),
            });
        }

        let remaining = self.range.len() - inner.downloaded;
        if bytes > remaining {
            return Err(CacheError::RangeViolation {
                key: self.key,
                range: self.range,
                requested: bytes,
                remaining,
            });
        }

        inner.downloaded += bytes;
        self.publish(&inner);
        Ok(())
    }

    /// End the writer's session and settle the segment into a terminal state
    ///
    /// Returns the bookkeeping the cache must apply: reservation excess to
    /// free and whether the backing file should be deleted.
    pub(crate) fn complete(&self, mode: FinalizeMode) -> CacheResult<CompletionEffect> {
        let mut inner = self.lock();
        if !inner.writer_attached {
            return Err(CacheError::InvalidStateTransition {
                from: inner.state.name().to_string(),
                to: "finalized".to_string(),
            });
        }

        let next = match mode {
            FinalizeMode::Success if inner.downloaded == self.range.len() => {
                SegmentState::Downloaded
            }
            FinalizeMode::Discard => SegmentState::Errored,
            _ if inner.downloaded > 0 => SegmentState::PartiallyDownloaded,
            _ => SegmentState::Errored,
        };
        self.transition(&mut inner, next)?;

        if next == SegmentState::Errored {
            inner.downloaded = 0;
        }
        let freed = inner.reserved - inner.downloaded;
        inner.reserved = inner.downloaded;
        inner.writer_attached = false;
        self.publish(&inner);

        Ok(CompletionEffect {
            freed,
            remove_file: next == SegmentState::Errored,
            state: next,
        })
    }

    /// Discard a failed segment's content and return it to Empty for retry
    pub(crate) fn reset(&self) -> CacheResult<CompletionEffect> {
        let mut inner = self.lock();
        if inner.writer_attached {
            return Err(CacheError::WriterConflict {
                key: self.key,
                range: self.range,
            });
        }
        self.transition(&mut inner, SegmentState::Empty)?;

        let freed = inner.reserved;
        inner.reserved = 0;
        inner.downloaded = 0;
        self.publish(&inner);

        Ok(CompletionEffect {
            freed,
            remove_file: true,
            state: SegmentState::Empty,
        })
    }

    /// Whether eviction may claim this segment right now
    pub(crate) fn is_evictable(&self) -> bool {
        if self.pin_count() != 0 {
            return false;
        }
        let inner = self.lock();
        inner.state != SegmentState::Downloading
    }
}

impl std::fmt::Display for FileSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        write!(
            f,
            "{}@{} [{} {}/{} bytes]",
            self.key,
            self.range,
            snapshot.state,
            snapshot.downloaded,
            self.range.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_segment() -> FileSegment {
        let key = CacheKey::from_path("object");
        let range = SegmentRange::new(0, 100).unwrap();
        FileSegment::new(key, range, PathBuf::from("/tmp/rangecache-test/0"))
    }

    #[test]
    fn test_transition_table() {
        use SegmentState::*;

        assert!(Empty.can_transition_to(Downloading));
        assert!(Downloading.can_transition_to(Downloaded));
        assert!(Downloading.can_transition_to(PartiallyDownloaded));
        assert!(Downloading.can_transition_to(Errored));
        assert!(PartiallyDownloaded.can_transition_to(Empty));
        assert!(Errored.can_transition_to(Empty));

        // Monotonic forward: no skipping, no going back
        assert!(!Empty.can_transition_to(Downloaded));
        assert!(!Downloaded.can_transition_to(Empty));
        assert!(!Downloaded.can_transition_to(Downloading));
        assert!(!Downloading.can_transition_to(Empty));
    }

    #[test]
    fn test_attach_and_advance() {
        let segment = test_segment();
        assert_eq!(segment.state(), SegmentState::Empty);

        segment.attach_writer().unwrap();
        assert_eq!(segment.state(), SegmentState::Downloading);

        segment.advance(40).unwrap();
        assert_eq!(segment.downloaded_size(), 40);

        // Writing past the declared range is rejected
        let err = segment.advance(61).unwrap_err();
        assert!(matches!(err, CacheError::RangeViolation { remaining: 60, .. }));
        assert_eq!(segment.downloaded_size(), 40);
    }

    #[test]
    fn test_second_writer_conflicts() {
        let segment = test_segment();
        segment.attach_writer().unwrap();

        let err = segment.attach_writer().unwrap_err();
        assert!(matches!(err, CacheError::WriterConflict { .. }));
    }

    #[test]
    fn test_complete_success_requires_full_range() {
        let segment = test_segment();
        segment.attach_writer().unwrap();
        segment.add_reserved(100);
        segment.advance(100).unwrap();

        let effect = segment.complete(FinalizeMode::Success).unwrap();
        assert_eq!(effect.state, SegmentState::Downloaded);
        assert_eq!(effect.freed, 0);
        assert!(!effect.remove_file);
    }

    #[test]
    fn test_complete_success_short_is_partial() {
        let segment = test_segment();
        segment.attach_writer().unwrap();
        segment.add_reserved(30);
        segment.advance(30).unwrap();

        let effect = segment.complete(FinalizeMode::Success).unwrap();
        assert_eq!(effect.state, SegmentState::PartiallyDownloaded);
        assert_eq!(segment.downloaded_size(), 30);
    }

    #[test]
    fn test_abort_with_no_bytes_is_errored() {
        let segment = test_segment();
        segment.attach_writer().unwrap();

        let effect = segment.complete(FinalizeMode::Abort).unwrap();
        assert_eq!(effect.state, SegmentState::Errored);
        assert!(effect.remove_file);
    }

    #[test]
    fn test_discard_frees_entire_reservation() {
        let segment = test_segment();
        segment.attach_writer().unwrap();
        segment.add_reserved(50);
        segment.advance(50).unwrap();

        let effect = segment.complete(FinalizeMode::Discard).unwrap();
        assert_eq!(effect.state, SegmentState::Errored);
        assert_eq!(effect.freed, 50);
        assert_eq!(segment.downloaded_size(), 0);
        assert!(effect.remove_file);
    }

    #[test]
    fn test_double_finalize_is_a_defect() {
        let segment = test_segment();
        segment.attach_writer().unwrap();
        segment.complete(FinalizeMode::Abort).unwrap();

        let err = segment.complete(FinalizeMode::Abort).unwrap_err();
        assert!(matches!(err, CacheError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_reset_for_retry() {
        let segment = test_segment();
        segment.attach_writer().unwrap();
        segment.add_reserved(30);
        segment.advance(30).unwrap();
        segment.complete(FinalizeMode::Abort).unwrap();
        assert_eq!(segment.state(), SegmentState::PartiallyDownloaded);

        let effect = segment.reset().unwrap();
        assert_eq!(effect.freed, 30);
        assert_eq!(segment.state(), SegmentState::Empty);
        assert_eq!(segment.downloaded_size(), 0);

        // A fresh writer can attach again
        segment.attach_writer().unwrap();
    }

    #[test]
    fn test_reset_from_downloaded_is_rejected() {
        let segment = test_segment();
        segment.attach_writer().unwrap();
        segment.add_reserved(100);
        segment.advance(100).unwrap();
        segment.complete(FinalizeMode::Success).unwrap();

        assert!(segment.reset().is_err());
    }

    #[test]
    fn test_pinning_and_evictability() {
        let segment = test_segment();
        assert!(segment.is_evictable());

        assert_eq!(segment.pin(), 1);
        assert!(!segment.is_evictable());
        assert_eq!(segment.unpin(), 0);
        assert!(segment.is_evictable());

        segment.attach_writer().unwrap();
        // Downloading segments are never evictable, pinned or not
        assert!(!segment.is_evictable());
    }

    #[tokio::test]
    async fn test_wait_for_downloaded_sees_progress() {
        let segment = std::sync::Arc::new(test_segment());
        segment.attach_writer().unwrap();

        let waiter = {
            let segment = segment.clone();
            tokio::spawn(async move {
                segment
                    .wait_for_downloaded(50, Duration::from_secs(5))
                    .await
            })
        };

        segment.advance(25).unwrap();
        segment.advance(25).unwrap();

        let downloaded = waiter.await.unwrap().unwrap();
        assert!(downloaded >= 50);
    }

    #[tokio::test]
    async fn test_wait_for_downloaded_times_out() {
        let segment = test_segment();
        segment.attach_writer().unwrap();

        let err = segment
            .wait_for_downloaded(10, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::WaitTimeout { .. }));
    }

    #[tokio::test]
    async fn test_wait_returns_on_terminal_state() {
        let segment = std::sync::Arc::new(test_segment());
        segment.attach_writer().unwrap();
        segment.add_reserved(30);
        segment.advance(30).unwrap();

        let waiter = {
            let segment = segment.clone();
            tokio::spawn(async move {
                segment
                    .wait_for_downloaded(100, Duration::from_secs(5))
                    .await
            })
        };

        segment.complete(FinalizeMode::Abort).unwrap();

        let downloaded = waiter.await.unwrap().unwrap();
        assert_eq!(downloaded, 30);
    }
}
