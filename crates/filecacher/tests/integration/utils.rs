use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use filecacher::{CacheConfig, CacheFactory, CacheManager};
use futures::FutureExt;
use tokio::io::AsyncWriteExt;

pub use filecacher_test::{TempDir, setup, tempdir};

/// Creates a cache that holds at most `max_count` files, along with its directory.
pub fn cache_with_capacity(max_count: usize) -> (CacheManager, TempDir) {
    setup();
    let cache_dir = tempdir();
    let cache = CacheManager::new(CacheConfig::count(cache_dir.path(), max_count)).unwrap();
    (cache, cache_dir)
}

/// A factory writing `contents` after sleeping for `delay`, counting its invocations.
pub fn counting_factory(
    contents: &'static [u8],
    delay: Duration,
) -> (CacheFactory, Arc<AtomicUsize>) {
    let computations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&computations);

    let factory = CacheFactory::new(move |sink| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            sink.write_all(contents).await?;
            anyhow::Ok(())
        }
        .boxed()
    });

    (factory, computations)
}

/// A factory writing `contents` right away.
pub fn bytes_factory(contents: &'static [u8]) -> CacheFactory {
    counting_factory(contents, Duration::ZERO).0
}
