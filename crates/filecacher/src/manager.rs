use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

use crate::eviction::eviction_candidates;
use crate::gate::GateGuard;
use crate::utils::defer;
use crate::{
    CacheConfig, CacheEntry, CacheError, CacheFactory, CacheListener, CacheMode, RemovalReason,
    TracingListener,
};

/// The bookkeeping guarded by the manager lock.
#[derive(Debug, Default)]
struct Tables {
    /// Entries visible to lookups, at most one per key.
    committed: HashMap<String, Arc<CacheEntry>>,
    /// Entries whose producer is currently running.
    in_flight: HashMap<String, Arc<CacheEntry>>,
    total_size: u64,
    total_count: usize,
}

/// State shared between the manager and its entries.
pub(crate) struct Shared {
    config: CacheConfig,
    tables: Mutex<Tables>,
    listener: Arc<dyn CacheListener>,
}

impl Shared {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn listener(&self) -> &dyn CacheListener {
        &*self.listener
    }

    pub(crate) fn report(&self, err: &CacheError) {
        metric!(counter("caches.error") += 1);
        self.listener.on_error(err);
    }

    /// Removes a disposed entry from the bookkeeping.
    ///
    /// The committed slot is only cleared if it still holds `entry` itself, and not a newer entry
    /// for the same key.
    pub(crate) fn forget(&self, entry: &Arc<CacheEntry>, counted_size: Option<u64>) {
        let mut tables = self.tables();
        if tables
            .committed
            .get(entry.key())
            .is_some_and(|committed| Arc::ptr_eq(committed, entry))
        {
            tables.committed.remove(entry.key());
        }
        if let Some(size) = counted_size {
            tables.total_size -= size;
            tables.total_count -= 1;
        }
    }
}

/// Result of registering a population under the manager lock.
enum Registration {
    /// The key was committed in the meantime.
    Committed(Arc<CacheEntry>),
    /// Another population of the key is running.
    Joined(Arc<CacheEntry>),
    /// This population is responsible for running the producer.
    Owned,
}

/// Manages a directory of cache files.
///
/// The manager is cheap to clone, all clones share the same cache.
#[derive(Clone)]
pub struct CacheManager {
    shared: Arc<Shared>,
}

impl CacheManager {
    /// Creates a cache in the configured directory, logging non-fatal errors.
    ///
    /// See [`with_listener`](Self::with_listener).
    pub fn new(config: CacheConfig) -> io::Result<Self> {
        Self::with_listener(config, Arc::new(TracingListener))
    }

    /// Creates a cache in the configured directory, reporting to `listener`.
    ///
    /// The directory is created if it does not exist, and all the files in it are deleted when
    /// [`clear_on_startup`](CacheConfig::clear_on_startup) is set.
    pub fn with_listener(
        config: CacheConfig,
        listener: Arc<dyn CacheListener>,
    ) -> io::Result<Self> {
        std::fs::create_dir_all(&config.directory)?;
        if config.clear_on_startup {
            crate::sweep(&config.directory, &*listener)?;
        }

        let shared = Shared {
            config,
            tables: Default::default(),
            listener,
        };
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// The policy of this cache.
    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    /// The directory containing the cache files.
    pub fn directory(&self) -> &Path {
        &self.shared.config.directory
    }

    /// Total size of all counted cache files in bytes.
    ///
    /// Entries that were replaced by a newer entry remain counted until their file is deleted.
    pub fn total_size(&self) -> u64 {
        self.shared.tables().total_size
    }

    /// Total number of counted cache files.
    pub fn total_count(&self) -> usize {
        self.shared.tables().total_count
    }

    /// The number of committed entries.
    pub fn len(&self) -> usize {
        self.shared.tables().committed.len()
    }

    /// Returns `true` if there are no committed entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The keys of all committed entries, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.shared.tables().committed.keys().cloned().collect()
    }

    /// Looks up a committed entry, pinning it if `pin` is set.
    pub fn lookup(&self, key: &str, pin: bool) -> Option<Arc<CacheEntry>> {
        let tables = self.shared.tables();
        let entry = tables.committed.get(key)?;
        if pin {
            entry.lock();
        }
        Some(Arc::clone(entry))
    }

    /// Returns the entry for `key`, producing it with `factory` if it is not cached yet.
    ///
    /// Concurrent calls for the same key run the producer only once and all share its result.
    /// If `pin` is set, the returned entry is [pinned](CacheEntry::lock).
    ///
    /// # Errors
    ///
    /// Fails if the producer fails, or the cache file could not be written. Every caller waiting
    /// for the same computation receives the same error, and a later call will retry.
    pub async fn get(
        &self,
        key: &str,
        factory: &CacheFactory,
        pin: bool,
    ) -> Result<Arc<CacheEntry>, CacheError> {
        metric!(counter("caches.access") += 1);

        if let Some(entry) = self.lookup(key, pin) {
            tracing::trace!(key, "Cache hit");
            metric!(counter("caches.memory.hit") += 1);
            return Ok(entry);
        }

        self.populate_inner(key, factory, pin, false).await
    }

    /// Produces a fresh entry for `key`, replacing any committed entry.
    ///
    /// If a computation for the key is already running, this joins it instead of starting another
    /// one. The replaced entry is disposed as soon as no stream reads from it anymore.
    pub async fn populate(
        &self,
        key: &str,
        factory: &CacheFactory,
        pin: bool,
    ) -> Result<Arc<CacheEntry>, CacheError> {
        self.populate_inner(key, factory, pin, true).await
    }

    async fn populate_inner(
        &self,
        key: &str,
        factory: &CacheFactory,
        pin: bool,
        force: bool,
    ) -> Result<Arc<CacheEntry>, CacheError> {
        let (entry, guard) = CacheEntry::new(key, Arc::downgrade(&self.shared));

        match self.register(&entry, pin, force) {
            Registration::Committed(committed) => return Ok(committed),
            Registration::Joined(winner) => {
                drop(guard);
                return self.join(winner, pin).await;
            }
            Registration::Owned => {}
        }

        tracing::trace!(key, "Computing cache entry");
        metric!(counter("caches.computation") += 1);

        if let Err(err) = self.produce(&entry, factory).await {
            tracing::debug!(
                key,
                error = &err as &dyn std::error::Error,
                "Failed to compute cache entry"
            );
            metric!(counter("caches.computation.failed") += 1);

            entry.set_failure(err.clone());
            let mut tables = self.shared.tables();
            if tables
                .in_flight
                .get(key)
                .is_some_and(|in_flight| Arc::ptr_eq(in_flight, &entry))
            {
                tables.in_flight.remove(key);
            }
            drop(tables);
            drop(guard);
            return Err(err);
        }

        Ok(self.commit(entry, guard, pin))
    }

    /// Registers `entry` as the in-flight computation of its key, unless there already is one.
    fn register(&self, entry: &Arc<CacheEntry>, pin: bool, force: bool) -> Registration {
        let key = entry.key();
        let mut tables = self.shared.tables();

        // a commit may have happened since `get` checked
        if !force {
            if let Some(committed) = tables.committed.get(key) {
                if pin {
                    committed.lock();
                }
                return Registration::Committed(Arc::clone(committed));
            }
        }

        if let Some(winner) = tables.in_flight.get(key) {
            return Registration::Joined(Arc::clone(winner));
        }

        entry.lock();
        tables.in_flight.insert(key.to_owned(), Arc::clone(entry));
        Registration::Owned
    }

    /// Waits for the running computation of `winner` and shares its outcome.
    async fn join(
        &self,
        winner: Arc<CacheEntry>,
        pin: bool,
    ) -> Result<Arc<CacheEntry>, CacheError> {
        tracing::trace!(key = winner.key(), "Joining running computation");
        metric!(counter("caches.singleflight.join") += 1);

        match self.shared.config.wait_timeout {
            Some(timeout) => tokio::time::timeout(timeout, winner.await_completion())
                .await
                .map_err(|_| CacheError::Timeout(timeout))?,
            None => winner.await_completion().await,
        }

        if let Some(err) = winner.failure() {
            return Err(err);
        }
        if pin {
            winner.lock();
        }
        Ok(winner)
    }

    /// Runs the producer into a fresh file in the cache directory.
    ///
    /// The file is deleted again if anything fails.
    async fn produce(&self, entry: &CacheEntry, factory: &CacheFactory) -> Result<(), CacheError> {
        let temp_file = factory.tempfile_in(self.directory())?;
        let mut sink = tokio::fs::File::from_std(temp_file.reopen()?);

        factory
            .produce(&mut sink)
            .await
            .map_err(CacheError::producer)?;
        sink.flush().await?;
        let size = sink.metadata().await?.len();
        drop(sink);

        let path = temp_file
            .into_temp_path()
            .keep()
            .map_err(|err| CacheError::from(err.error))?;

        tracing::trace!(key = entry.key(), path = %path.display(), size, "Wrote cache file");
        metric!(time_raw("caches.file.size") = size);
        entry.set_contents(path, size);
        Ok(())
    }

    /// Makes a produced entry visible, and enforces the capacity of the cache.
    fn commit(&self, entry: Arc<CacheEntry>, guard: GateGuard, pin: bool) -> Arc<CacheEntry> {
        let key = entry.key();
        let superseded = {
            let mut tables = self.shared.tables();
            if tables
                .in_flight
                .get(key)
                .is_some_and(|in_flight| Arc::ptr_eq(in_flight, &entry))
            {
                tables.in_flight.remove(key);
            }
            let superseded = tables.committed.insert(key.to_owned(), Arc::clone(&entry));
            tables.total_size += entry.size();
            tables.total_count += 1;
            entry.mark_counted();
            superseded
        };
        tracing::debug!(key, size = entry.size(), "Committed cache entry");

        self.check_caches();

        if let Some(superseded) = superseded {
            if let Err(err) = superseded.dispose_with(RemovalReason::Superseded) {
                self.shared.report(&err);
            }
        }

        if !pin {
            entry.unlock();
        }
        drop(guard);
        self.shared.listener.on_cached(&entry);
        entry
    }

    /// Evicts unlocked entries until the cache is within its capacity.
    ///
    /// This runs after every commit and can be called at any time. Entries that cannot be deleted
    /// are reported to the listener and skipped, they will be retried by the next check.
    ///
    /// A freshly committed entry stays pinned until its own check has finished. When commits run
    /// concurrently, each check may skip the other's new entry, leaving the cache above
    /// [`max_count`](CacheConfig::max_count) until the next commit or a
    /// [housekeeping](Self::spawn_housekeeping) tick.
    pub fn check_caches(&self) {
        let config = &self.shared.config;
        let victims = {
            let tables = self.shared.tables();
            metric!(gauge("caches.size.files") = tables.total_count as u64);
            metric!(gauge("caches.size.bytes") = tables.total_size);

            match config.mode {
                CacheMode::Size => {
                    tracing::warn!("Size based eviction is not supported, skipping");
                    return;
                }
                CacheMode::Count => {
                    let overflow = tables.committed.len().saturating_sub(config.max_count);
                    if overflow == 0 {
                        return;
                    }
                    let mut candidates =
                        eviction_candidates(tables.committed.values(), config.removal_priority);
                    candidates.truncate(overflow);
                    candidates
                }
            }
        };

        for entry in victims {
            // pinned or opened since the candidates were chosen
            if entry.is_locked() {
                continue;
            }
            tracing::debug!(key = entry.key(), size = entry.size(), "Evicting cache entry");
            match entry.dispose_with(RemovalReason::Evicted) {
                Ok(()) => metric!(counter("caches.evicted") += 1),
                Err(err) => self.shared.report(&err),
            }
        }
    }

    /// Copies the contents of `entry` into a newly created file at `destination`.
    ///
    /// The entry is pinned while copying, and unpinned afterwards regardless of the outcome.
    /// Returns the number of bytes copied.
    pub async fn copy_to(
        &self,
        entry: &Arc<CacheEntry>,
        destination: impl AsRef<Path>,
    ) -> Result<u64, CacheError> {
        entry.lock();
        let _unpin = defer(|| entry.unlock());

        let mut stream = entry.open_stream().await?;
        let mut file = tokio::fs::File::create(destination).await?;
        let copied = tokio::io::copy(&mut stream, &mut file).await?;
        file.flush().await?;

        Ok(copied)
    }

    /// Runs [`check_caches`](Self::check_caches) every
    /// [`check_interval`](CacheConfig::check_interval).
    ///
    /// Returns `None` if no interval is configured. The task stops once all clones of the manager
    /// have been dropped. Must be called from within a tokio runtime.
    pub fn spawn_housekeeping(&self) -> Option<JoinHandle<()>> {
        let period = self.shared.config.check_interval.filter(|p| !p.is_zero())?;
        let shared = Arc::downgrade(&self.shared);

        let task = async move {
            let mut interval = tokio::time::interval(period);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                CacheManager { shared }.check_caches();
            }
        };
        Some(tokio::spawn(task))
    }
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.shared.tables();
        f.debug_struct("CacheManager")
            .field("config", &self.shared.config)
            .field("committed", &tables.committed.len())
            .field("in_flight", &tables.in_flight.len())
            .field("total_size", &tables.total_size)
            .field("total_count", &tables.total_count)
            .finish()
    }
}
