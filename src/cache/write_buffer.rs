//! Exclusive sequential writer that fills a file segment
//!
//! A [`SegmentWriteBuffer`] owns a segment's writer role from construction
//! until it is finished, aborted, or dropped. Every append first charges its
//! size against the cache capacity with a bounded wait, so reservation and
//! append succeed or fail together; a failed append rolls its reservation
//! back. Finalization runs on every exit path: the explicit [`finish`]
//! flushes durably and is the only route to a Downloaded segment, while the
//! drop path settles the segment as unsuccessful so it never remains
//! Downloading after an abort or unwind.
//!
//! [`finish`]: SegmentWriteBuffer::finish

use std::sync::Arc;

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

use crate::errors::{CacheError, CacheResult};

use super::file_cache::FileCache;
use super::reader::SegmentReader;
use super::segment::{FileSegment, FinalizeMode, SegmentState};

/// What went fatally wrong during this writer's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    /// A write overran the declared range; committed bytes stay valid
    Range,
    /// The storage layer failed; nothing on disk can be trusted
    Io,
}

/// Sequential writer bound to exactly one segment
pub struct SegmentWriteBuffer {
    cache: Arc<FileCache>,
    segment: Arc<FileSegment>,
    file: tokio::fs::File,
    /// Bytes committed through this writer
    written: u64,
    /// High-water mark of durably flushed bytes
    synced: u64,
    failure: Option<Failure>,
    finalized: bool,
}

impl SegmentWriteBuffer {
    /// Take exclusive writer status over `segment` and open its backing file
    ///
    /// The segment must be Empty (a fresh miss or an explicitly reset retry)
    /// and should come from a live holder of this cache. Fails with
    /// `WriterConflict` when another writer already owns it.
    pub async fn attach(
        cache: Arc<FileCache>,
        segment: Arc<FileSegment>,
    ) -> CacheResult<Self> {
        segment.attach_writer()?;
        // Writers pin on their own so the segment stays out of eviction
        // even after the originating holder is gone.
        segment.pin();

        let open_result = async {
            if let Some(parent) = segment.path().parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(segment.path())
                .await
        }
        .await;

        let file = match open_result {
            Ok(file) => file,
            Err(e) => {
                error!(
                    key = %segment.key(),
                    range = %segment.range(),
                    "Failed to open segment backing file: {}",
                    e
                );
                // Nothing was written: settle as Errored and let go
                if let Err(finalize_err) =
                    cache.finalize_segment(&segment, FinalizeMode::Discard)
                {
                    warn!("Failed to finalize unopened segment: {}", finalize_err);
                }
                cache.release(&segment);
                return Err(e.into());
            }
        };

        debug!(key = %segment.key(), range = %segment.range(), "Writer attached");

        Ok(Self {
            cache,
            segment,
            file,
            written: 0,
            synced: 0,
            failure: None,
            finalized: false,
        })
    }

    /// The segment this writer fills
    pub fn segment(&self) -> &Arc<FileSegment> {
        &self.segment
    }

    /// Bytes committed through this writer so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Bytes the declared range can still accept
    pub fn remaining(&self) -> u64 {
        self.segment.range().len() - self.written
    }

    /// Reserve capacity for `data`, then append and commit it
    ///
    /// Capacity exhaustion is retryable: nothing is reserved and nothing is
    /// appended. Overrunning the declared range is fatal to this writer; a
    /// storage failure is fatal and discards the segment on finalize.
    pub async fn write(&mut self, data: &[u8]) -> CacheResult<()> {
        if let Some(failure) = self.failure {
            return Err(CacheError::InvalidStateTransition {
                from: match failure {
                    Failure::Range => "failed writer (range violation)".to_string(),
                    Failure::Io => "failed writer (storage error)".to_string(),
                },
                to: "write".to_string(),
            });
        }

        let len = data.len() as u64;
        if len == 0 {
            return Ok(());
        }

        let remaining = self.remaining();
        if len > remaining {
            self.failure = Some(Failure::Range);
            return Err(CacheError::RangeViolation {
                key: self.segment.key(),
                range: self.segment.range(),
                requested: len,
                remaining,
            });
        }

        let timeout = self.cache.config().reservation_timeout;
        if !self.cache.try_reserve(&self.segment, len, timeout).await? {
            // Retryable: previously committed bytes are untouched
            return Err(CacheError::CapacityExhausted {
                requested: len,
                timeout,
            });
        }

        if let Err(e) = self.file.write_all(data).await {
            error!(
                key = %self.segment.key(),
                range = %self.segment.range(),
                "Segment append failed: {}",
                e
            );
            self.cache.release_reservation(&self.segment, len);
            self.failure = Some(Failure::Io);
            return Err(e.into());
        }

        self.segment.advance(len)?;
        self.written += len;
        Ok(())
    }

    /// Force a durable flush of everything committed so far
    ///
    /// Idempotent: after the first flush of a given tail, further calls are
    /// no-ops until more bytes are written.
    pub async fn sync(&mut self) -> CacheResult<()> {
        if self.synced == self.written {
            return Ok(());
        }

        if let Err(e) = self.file.sync_data().await {
            error!(
                key = %self.segment.key(),
                range = %self.segment.range(),
                "Segment flush failed: {}",
                e
            );
            self.failure = Some(Failure::Io);
            return Err(e.into());
        }

        self.synced = self.written;
        Ok(())
    }

    /// A reader over exactly the bytes written so far
    ///
    /// Opens the same backing file without duplicating storage, so the
    /// producing process can re-consume its own output immediately.
    pub async fn as_reader(&self) -> CacheResult<SegmentReader> {
        SegmentReader::open(
            self.segment.path(),
            self.segment.range().start,
            0,
            self.written,
        )
        .await
    }

    /// Flush durably and finalize
    ///
    /// The segment becomes Downloaded only when no error occurred and the
    /// declared range was written in full; a short but clean write settles
    /// as PartiallyDownloaded.
    pub async fn finish(mut self) -> CacheResult<SegmentState> {
        self.sync().await?;
        self.settle(FinalizeMode::Success)
    }

    /// Finalize as unsuccessful, keeping the committed prefix readable
    pub async fn abort(mut self) -> CacheResult<SegmentState> {
        self.settle(FinalizeMode::Abort)
    }

    fn settle(&mut self, mode: FinalizeMode) -> CacheResult<SegmentState> {
        let mode = match self.failure {
            Some(Failure::Io) => FinalizeMode::Discard,
            Some(Failure::Range) => FinalizeMode::Abort,
            None => mode,
        };
        let state = self.cache.finalize_segment(&self.segment, mode)?;
        self.finalized = true;
        self.cache.release(&self.segment);
        Ok(state)
    }
}

impl Drop for SegmentWriteBuffer {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }

        // Dropping without finish() is an abort: the committed prefix stays
        // readable but the segment never claims completion or durability.
        if let Err(e) = self.settle(FinalizeMode::Abort) {
            warn!(
                key = %self.segment.key(),
                range = %self.segment.range(),
                "Failed to finalize dropped writer: {}",
                e
            );
        }
    }
}

impl std::fmt::Debug for SegmentWriteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentWriteBuffer")
            .field("segment", &format_args!("{}", self.segment))
            .field("written", &self.written)
            .field("synced", &self.synced)
            .field("failure", &self.failure)
            .finish()
    }
}
