//! Bounded sequential reader over a segment's written prefix
//!
//! A [`SegmentReader`] exposes exactly the bytes a segment held when the
//! reader was acquired, as a plain [`AsyncRead`] stream. Row-format
//! serializers and other collaborators consume it with no cache-specific
//! knowledge; whether the bytes came from a completed segment or the growing
//! prefix of an in-progress one is invisible to them.

use std::io::SeekFrom;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, ReadBuf, Take};

use crate::errors::CacheResult;

enum Source {
    /// Open backing file, bounded to the readable window
    File(Take<File>),
    /// Nothing written yet; reads return EOF immediately
    Empty,
}

/// Sequential reader over a fixed window of one segment's backing file
pub struct SegmentReader {
    source: Source,
    /// Absolute offset within the object where this reader starts
    offset: u64,
    /// Total bytes this reader will yield
    len: u64,
}

impl SegmentReader {
    /// Open a reader over `limit` bytes of `path`, starting `skip` bytes in
    ///
    /// `offset` is the absolute position within the logical object, kept for
    /// diagnostics. A zero-length window never touches the filesystem, so
    /// freshly created segments are readable (as empty) before their backing
    /// file exists.
    pub(crate) async fn open(
        path: &Path,
        offset: u64,
        skip: u64,
        limit: u64,
    ) -> CacheResult<Self> {
        if limit == 0 {
            return Ok(Self {
                source: Source::Empty,
                offset,
                len: 0,
            });
        }

        let mut file = File::open(path).await?;
        if skip > 0 {
            file.seek(SeekFrom::Start(skip)).await?;
        }

        Ok(Self {
            source: Source::File(file.take(limit)),
            offset,
            len: limit,
        })
    }

    /// Absolute offset within the object where this reader starts
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total bytes this reader yields
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the reader yields no bytes at all
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read the whole window into a vector
    pub async fn read_to_end(&mut self) -> CacheResult<Vec<u8>> {
        let mut buffer = Vec::with_capacity(self.len as usize);
        AsyncReadExt::read_to_end(self, &mut buffer).await?;
        Ok(buffer)
    }
}

impl AsyncRead for SegmentReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut self.get_mut().source {
            Source::File(inner) => Pin::new(inner).poll_read(cx, buf),
            Source::Empty => Poll::Ready(Ok(())),
        }
    }
}

impl std::fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentReader")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}
