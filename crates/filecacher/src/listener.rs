use std::fmt;
use std::sync::Arc;

use crate::{CacheEntry, CacheError};

/// Describes why an entry was removed from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// The entry was evicted because the cache exceeded its capacity.
    Evicted,
    /// A newer entry was committed under the same key.
    Superseded,
    /// The entry was disposed explicitly.
    Disposed,
}

impl AsRef<str> for RemovalReason {
    fn as_ref(&self) -> &str {
        match self {
            Self::Evicted => "evicted",
            Self::Superseded => "superseded",
            Self::Disposed => "disposed",
        }
    }
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Receives notifications about the lifecycle of cache entries.
///
/// All methods are invoked synchronously from within cache operations, after the cache has
/// released its internal locks. Implementations should return quickly and must not panic.
pub trait CacheListener: Send + Sync {
    /// Called after a freshly produced entry has been committed.
    ///
    /// This is called once per computation, callers that joined a running computation do not
    /// trigger additional notifications.
    fn on_cached(&self, entry: &Arc<CacheEntry>) {
        let _ = entry;
    }

    /// Called after an entry has been disposed and its file was deleted.
    fn on_removed(&self, entry: &Arc<CacheEntry>, reason: RemovalReason) {
        let _ = (entry, reason);
    }

    /// Called for failures that do not fail the current operation.
    ///
    /// This includes errors deleting files during the startup sweep or eviction. By default, the
    /// error is logged.
    fn on_error(&self, error: &CacheError) {
        tracing::error!(
            error = error as &dyn std::error::Error,
            "Cache housekeeping failed"
        );
    }
}

/// A [`CacheListener`] that only logs errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl CacheListener for TracingListener {}
