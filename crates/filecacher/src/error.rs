use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// An error that happens while populating, streaming or disposing a cache entry.
///
/// A single failed computation is reported to every caller waiting for it, which is why this
/// error is cheaply [`Clone`]able.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The producer supplied with the [`CacheFactory`](crate::CacheFactory) failed.
    #[error("producer failed: {0:#}")]
    Producer(Arc<anyhow::Error>),
    /// Reading, writing or deleting a cache file failed.
    #[error("filesystem error: {0}")]
    Io(#[source] Arc<io::Error>),
    /// The entry was disposed, its file is gone.
    #[error("cache entry has been disposed")]
    Disposed,
    /// Waiting for a concurrent computation of the same key took too long.
    #[error("waiting for concurrent computation timed out after {0:?}")]
    Timeout(Duration),
}

impl CacheError {
    pub(crate) fn producer(err: anyhow::Error) -> Self {
        Self::Producer(Arc::new(err))
    }

    /// Returns `true` if this error was raised by the producer itself.
    pub fn is_producer_failure(&self) -> bool {
        matches!(self, Self::Producer(_))
    }
}

impl From<io::Error> for CacheError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
