//! # A disk-backed content cache
//!
//! `filecacher` memoizes expensive or remote-sourced byte streams on the local file system.
//! Callers ask for a value by string key, and if it is not cached yet, a caller-supplied
//! asynchronous producer writes the value into a fresh file inside the cache directory. That file
//! is then tracked, counted, and subject to eviction once the configured capacity is exceeded.
//!
//! ## Cache Entries
//!
//! Every cached value is represented by a [`CacheEntry`], which is always handed out as an
//! `Arc<CacheEntry>`. An entry knows its key, the path and size of its backing file, and carries
//! two flags that protect it from eviction:
//!
//! - The *pinned* flag is controlled by callers via [`CacheEntry::lock`] and
//!   [`CacheEntry::unlock`]. It is a plain flag, not a reference count. Callers have to pair
//!   pinning and unpinning themselves.
//! - The *streaming* flag is set for as long as an [`EntryStream`] is reading the backing file.
//!
//! An entry with either flag set is [locked](CacheEntry::is_locked) and never evicted.
//!
//! ## Single-flight population
//!
//! [`CacheManager::get`] returns committed entries without any I/O. On a miss, the manager runs
//! the population protocol, which guarantees that only a single producer runs for any given key,
//! no matter how many callers are asking for it concurrently. The first caller registers an
//! in-flight entry and runs the producer, all later callers wait for that computation to finish and
//! share its result, or its error.
//!
//! [`CacheManager::populate`] forces a refresh. The freshly produced entry replaces the committed
//! one, and the replaced entry is disposed once nobody is streaming from it anymore.
//!
//! ## Eviction
//!
//! After every commit, [`CacheManager::check_caches`] enforces the capacity configured in the
//! [`CacheConfig`]. Eviction is purely size based: unlocked entries are ordered by their file size,
//! and either the smallest or the largest ones are removed first, depending on the configured
//! [`RemovalPriority`]. Only [`CacheMode::Count`] is enforced. [`CacheMode::Size`] is accepted in
//! configuration but only emits a diagnostic.
//!
//! A failure to delete a single file is reported to the [`CacheListener`] and does not stop the
//! eviction of the remaining candidates.
//!
//! ## Disposal
//!
//! [`CacheEntry::dispose`] deletes the backing file and removes the entry from the bookkeeping.
//! If a stream is currently reading the entry, the deletion is deferred until the stream is
//! dropped. Disposal always checks entry identity, so disposing a replaced entry never removes the
//! table slot of its replacement.
//!
//! ## Metrics
//!
//! The following metrics are emitted when a statsd client is [configured](metrics::configure_statsd):
//!
//! - `caches.access`: Every call to [`CacheManager::get`].
//! - `caches.memory.hit`: Calls to [`CacheManager::get`] served from the committed table.
//! - `caches.computation`: Producer invocations.
//! - `caches.computation.failed`: Producer invocations that failed.
//! - `caches.singleflight.join`: Callers that joined an already running computation.
//! - `caches.file.size`: A histogram of the size (in bytes) of freshly written cache files.
//! - `caches.evicted` and `caches.removed`: Entries removed by eviction and by any disposal.
//! - `caches.size.files` and `caches.size.bytes`: The aggregates, after every eviction check.
//! - `caches.error`: Non-fatal failures reported to the [`CacheListener`].
//! - `caches.sweep.files_removed` and `caches.sweep.bytes_removed`: Leftovers deleted by [`sweep`].

#![warn(missing_docs, missing_debug_implementations)]

#[macro_use]
pub mod metrics;

pub mod config;

mod cleanup;
mod entry;
mod error;
mod eviction;
mod factory;
mod gate;
mod listener;
mod manager;
mod stream;
mod utils;


pub use cleanup::{SweepStats, sweep};
pub use config::{CacheConfig, CacheMode, Config, RemovalPriority};
pub use entry::CacheEntry;
pub use error::CacheError;
pub use factory::{CacheFactory, CacheProducer};
pub use listener::{CacheListener, RemovalReason, TracingListener};
pub use manager::CacheManager;
pub use stream::EntryStream;
