use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::gate::{Gate, GateGuard};
use crate::listener::RemovalReason;
use crate::manager::Shared;
use crate::utils::catch_not_found;
use crate::{CacheError, EntryStream};

#[derive(Debug, Default)]
struct EntryState {
    /// The backing file, `None` until the producer succeeded and again after deletion.
    path: Option<PathBuf>,
    size: u64,
    /// Whether an [`EntryStream`] currently holds the gate.
    streaming: bool,
    disposed: bool,
    /// Whether `size` is part of the manager aggregates.
    counted: bool,
    /// Disposal that was requested while streaming, performed once the stream is released.
    pending_removal: Option<RemovalReason>,
    /// Why the population of this entry failed, shared with all single-flight joiners.
    failure: Option<CacheError>,
}

/// Metadata and concurrency gate of one cached value.
///
/// Entries are created by the [`CacheManager`](crate::CacheManager) and always shared as
/// `Arc<CacheEntry>`. Two handles refer to the same entry iff they are [`Arc::ptr_eq`].
pub struct CacheEntry {
    key: String,
    gate: Gate,
    pinned: AtomicBool,
    state: Mutex<EntryState>,
    shared: Weak<Shared>,
}

impl CacheEntry {
    /// Creates a new entry whose gate is held by the returned guard.
    pub(crate) fn new(key: &str, shared: Weak<Shared>) -> (Arc<Self>, GateGuard) {
        let (gate, guard) = Gate::held();
        let entry = Self {
            key: key.to_owned(),
            gate,
            pinned: AtomicBool::new(false),
            state: Mutex::default(),
            shared,
        };
        (Arc::new(entry), guard)
    }

    fn state(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The key this entry is cached under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The path of the backing file.
    ///
    /// This is `None` before the entry was produced, and after it has been disposed.
    pub fn path(&self) -> Option<PathBuf> {
        self.state().path.clone()
    }

    /// The size of the backing file in bytes.
    pub fn size(&self) -> u64 {
        self.state().size
    }

    /// Whether the backing file currently exists on disk.
    pub fn exists(&self) -> bool {
        self.path().is_some_and(|path| path.is_file())
    }

    /// Pins the entry, protecting it from eviction.
    pub fn lock(&self) {
        self.pinned.store(true, Ordering::SeqCst);
    }

    /// Unpins the entry.
    pub fn unlock(&self) {
        self.pinned.store(false, Ordering::SeqCst);
    }

    /// Whether the entry is pinned via [`lock`](Self::lock).
    pub fn is_pinned(&self) -> bool {
        self.pinned.load(Ordering::SeqCst)
    }

    /// Whether the entry is either pinned or being streamed, and thus exempt from eviction.
    pub fn is_locked(&self) -> bool {
        self.is_pinned() || self.state().streaming
    }

    /// Whether [`dispose`](Self::dispose) has been called on the entry.
    pub fn is_disposed(&self) -> bool {
        self.state().disposed
    }

    /// Opens a read-only stream of the backing file.
    ///
    /// This waits until no other stream is open on this entry. The entry cannot be deleted while
    /// the stream is alive.
    pub async fn open_stream(self: &Arc<Self>) -> Result<EntryStream, CacheError> {
        let guard = self.gate.acquire_exclusive().await?;
        let path = {
            let mut state = self.state();
            let path = match (&state.path, state.disposed) {
                (Some(path), false) => path.clone(),
                _ => return Err(CacheError::Disposed),
            };
            state.streaming = true;
            path
        };

        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(EntryStream::new(Arc::clone(self), file, guard)),
            Err(err) => {
                self.end_stream();
                Err(err.into())
            }
        }
    }

    /// Deletes the backing file and removes the entry from the cache.
    ///
    /// Disposing an entry more than once has no effect. If a stream is open on the entry, the file
    /// is deleted once the stream is dropped.
    ///
    /// On error, the entry stays cached and may be disposed again later.
    pub fn dispose(self: &Arc<Self>) -> Result<(), CacheError> {
        self.dispose_with(RemovalReason::Disposed)
    }

    pub(crate) fn dispose_with(self: &Arc<Self>, reason: RemovalReason) -> Result<(), CacheError> {
        {
            let mut state = self.state();
            if state.disposed {
                return Ok(());
            }
            state.disposed = true;
            if state.streaming {
                tracing::debug!(key = self.key(), "Deferring disposal of streamed cache entry");
                state.pending_removal = Some(reason);
                return Ok(());
            }
        }
        self.finalize(reason)
    }

    /// Physically deletes the entry and updates the manager bookkeeping.
    fn finalize(self: &Arc<Self>, reason: RemovalReason) -> Result<(), CacheError> {
        let counted_size = {
            let mut guard = self.state();
            let state = &mut *guard;
            if let Some(path) = &state.path {
                if let Err(err) = catch_not_found(|| fs::remove_file(path)) {
                    state.disposed = false;
                    return Err(err.into());
                }
                tracing::debug!(key = self.key(), path = %path.display(), "Removed cache file");
            }
            state.path = None;
            std::mem::take(&mut state.counted).then_some(state.size)
        };
        self.gate.close();

        if let Some(shared) = self.shared.upgrade() {
            shared.forget(self, counted_size);
            shared.listener().on_removed(self, reason);
        }
        metric!(counter("caches.removed") += 1, "reason" => reason.as_ref());
        Ok(())
    }

    /// Clears the streaming flag and performs a deferred disposal.
    ///
    /// The gate itself is released by the stream's [`GateGuard`].
    pub(crate) fn end_stream(self: &Arc<Self>) {
        let pending = {
            let mut state = self.state();
            state.streaming = false;
            state.pending_removal.take()
        };

        if let Some(reason) = pending {
            if let Err(err) = self.finalize(reason) {
                if let Some(shared) = self.shared.upgrade() {
                    shared.report(&err);
                }
            }
        }
    }

    pub(crate) async fn await_completion(&self) {
        self.gate.await_completion().await
    }

    /// Records the produced backing file.
    pub(crate) fn set_contents(&self, path: PathBuf, size: u64) {
        let mut state = self.state();
        state.path = Some(path);
        state.size = size;
    }

    /// Marks the entry size as being part of the manager aggregates.
    pub(crate) fn mark_counted(&self) {
        self.state().counted = true;
    }

    pub(crate) fn set_failure(&self, err: CacheError) {
        self.state().failure = Some(err);
    }

    pub(crate) fn failure(&self) -> Option<CacheError> {
        self.state().failure.clone()
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("path", &state.path)
            .field("size", &state.size)
            .field("pinned", &self.is_pinned())
            .field("streaming", &state.streaming)
            .field("disposed", &state.disposed)
            .field("gate_held", &self.gate.is_held())
            .finish()
    }
}
