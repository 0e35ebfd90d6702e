use std::fmt;
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite, ReadBuf};

use crate::CacheEntry;
use crate::gate::GateGuard;

fn unsupported(operation: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("cache streams are read-only, {operation} is not supported"),
    )
}

fn closed() -> io::Error {
    io::Error::other("cache stream is closed")
}

/// A read-only view of a cache entry's backing file.
///
/// While the stream is alive, it holds the gate of its entry: the entry counts as locked, no other
/// stream can be opened on it, and its file will not be deleted. Disposal requested in the
/// meantime is carried out when the stream is dropped.
///
/// The stream implements [`AsyncRead`] and [`AsyncSeek`]. It also implements [`AsyncWrite`] so
/// it can stand in wherever a file is expected, but all write operations fail with
/// [`io::ErrorKind::Unsupported`].
pub struct EntryStream {
    entry: Arc<CacheEntry>,
    file: Option<File>,
    _gate: GateGuard,
}

impl EntryStream {
    pub(crate) fn new(entry: Arc<CacheEntry>, file: File, gate: GateGuard) -> Self {
        Self {
            entry,
            file: Some(file),
            _gate: gate,
        }
    }

    /// The entry being streamed.
    pub fn entry(&self) -> &Arc<CacheEntry> {
        &self.entry
    }

    /// The length of the stream in bytes.
    pub fn len(&self) -> u64 {
        self.entry.size()
    }

    /// Returns `true` if the stream is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn file(&mut self) -> io::Result<Pin<&mut File>> {
        self.file.as_mut().map(Pin::new).ok_or_else(closed)
    }
}

impl AsyncRead for EntryStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().file() {
            Ok(file) => file.poll_read(cx, buf),
            Err(err) => Poll::Ready(Err(err)),
        }
    }
}

impl AsyncSeek for EntryStream {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        self.get_mut().file()?.start_seek(position)
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        match self.get_mut().file() {
            Ok(file) => file.poll_complete(cx),
            Err(err) => Poll::Ready(Err(err)),
        }
    }
}

impl AsyncWrite for EntryStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(unsupported("writing")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(unsupported("flushing")))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(unsupported("shutting down")))
    }
}

impl Drop for EntryStream {
    fn drop(&mut self) {
        // close the file before a deferred disposal deletes it
        drop(self.file.take());
        self.entry.end_stream();
    }
}

impl fmt::Debug for EntryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryStream")
            .field("key", &self.entry.key())
            .field("open", &self.file.is_some())
            .finish()
    }
}
