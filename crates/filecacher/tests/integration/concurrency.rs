use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::{cache_with_capacity, counting_factory};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_flight_per_key() {
    let (cache, _cache_dir) = cache_with_capacity(100);
    let (factory, computations) = counting_factory(b"shared", Duration::from_millis(50));

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let cache = cache.clone();
            let factory = factory.clone();
            let key = format!("key-{}", i % 4);
            tokio::spawn(async move { cache.get(&key, &factory, false).await })
        })
        .collect();

    let mut entries = vec![];
    for task in tasks {
        entries.push(task.await.unwrap().unwrap());
    }

    assert_eq!(computations.load(Ordering::SeqCst), 4);
    assert_eq!(cache.total_count(), 4);
    for entry in &entries {
        let committed = cache.lookup(entry.key(), false).unwrap();
        assert!(Arc::ptr_eq(entry, &committed));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_repopulation() {
    let (cache, cache_dir) = cache_with_capacity(100);
    let (factory, _computations) = counting_factory(b"v", Duration::from_millis(5));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let cache = cache.clone();
            let factory = factory.clone();
            tokio::spawn(async move { cache.populate("key", &factory, false).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    // whatever the interleaving, exactly one entry survives
    assert!(cache.lookup("key", false).unwrap().exists());
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.total_count(), 1);
    assert_eq!(cache.total_size(), 1);
    assert_eq!(std::fs::read_dir(cache_dir.path()).unwrap().count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_eviction_under_load() {
    let (cache, cache_dir) = cache_with_capacity(5);
    let (factory, computations) = counting_factory(b"payload", Duration::from_millis(1));

    let tasks: Vec<_> = (0..40)
        .map(|i| {
            let cache = cache.clone();
            let factory = factory.clone();
            tokio::spawn(async move { cache.get(&format!("key-{i}"), &factory, false).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    // concurrent commits may skip each other's still pinned entries
    cache.check_caches();

    assert_eq!(computations.load(Ordering::SeqCst), 40);
    assert_eq!(cache.len(), 5);
    assert_eq!(cache.total_count(), 5);
    assert_eq!(cache.total_size(), 5 * 7);
    assert_eq!(std::fs::read_dir(cache_dir.path()).unwrap().count(), 5);
}
