use std::fs;

use filecacher::{CacheConfig, CacheError, CacheManager, RemovalPriority};
use tokio::io::AsyncReadExt;

use crate::{bytes_factory, cache_with_capacity, setup, tempdir};

#[tokio::test]
async fn test_get_stream_and_copy() {
    let (cache, cache_dir) = cache_with_capacity(10);
    let target = tempdir();

    let entry = cache
        .get("report", &bytes_factory(b"quarterly numbers"), false)
        .await
        .unwrap();
    assert!(entry.path().unwrap().starts_with(cache_dir.path()));

    let mut contents = String::new();
    let mut stream = entry.open_stream().await.unwrap();
    stream.read_to_string(&mut contents).await.unwrap();
    drop(stream);
    assert_eq!(contents, "quarterly numbers");

    let destination = target.path().join("report.txt");
    assert_eq!(cache.copy_to(&entry, &destination).await.unwrap(), 17);
    assert_eq!(fs::read_to_string(&destination).unwrap(), "quarterly numbers");

    // the copy is independent of the cache
    entry.dispose().unwrap();
    assert!(destination.is_file());
    assert!(cache.is_empty());
    assert!(fs::read_dir(cache_dir.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn test_files_match_bookkeeping() {
    let (cache, cache_dir) = cache_with_capacity(3);

    for (key, contents) in [
        ("one", &b"1"[..]),
        ("two", b"22"),
        ("three", b"333"),
        ("four", b"4444"),
        ("five", b"55555"),
    ] {
        cache.get(key, &bytes_factory(contents), false).await.unwrap();
    }

    let files: Vec<_> = fs::read_dir(cache_dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().metadata().unwrap().len())
        .collect();
    assert_eq!(files.len(), cache.total_count());
    assert_eq!(files.iter().sum::<u64>(), cache.total_size());

    let mut keys = cache.keys();
    keys.sort();
    assert_eq!(keys, ["five", "four", "three"]);
}

#[tokio::test]
async fn test_pinned_copy_survives_pressure() {
    setup();
    let cache_dir = tempdir();
    let config =
        CacheConfig::count(cache_dir.path(), 1).with_priority(RemovalPriority::LargestFirst);
    let cache = CacheManager::new(config).unwrap();

    let big = cache
        .get("big", &bytes_factory(b"a large file"), true)
        .await
        .unwrap();
    cache.get("small", &bytes_factory(b"s"), false).await.unwrap();
    cache.get("tiny", &bytes_factory(b"t"), false).await.unwrap();

    assert!(big.exists());
    assert_eq!(cache.len(), 2);

    big.unlock();
    cache.check_caches();
    assert!(!big.exists());
    assert!(cache.lookup("big", false).is_none());
    assert_eq!(cache.total_count(), 1);
}

#[tokio::test]
async fn test_disposed_entry_cannot_be_streamed() {
    let (cache, _cache_dir) = cache_with_capacity(10);

    let entry = cache.get("a", &bytes_factory(b"a"), false).await.unwrap();
    entry.dispose().unwrap();

    assert!(matches!(entry.open_stream().await, Err(CacheError::Disposed)));

    // a new population starts from scratch
    let fresh = cache.get("a", &bytes_factory(b"b"), false).await.unwrap();
    assert!(fresh.exists());
    assert!(entry.path().is_none());
}

#[test]
fn test_config_from_yaml() {
    setup();
    let cache_dir = tempdir();
    let yaml = format!(
        "cache:\n  directory: {}\n  max_count: 2\n  removal_priority: largest_first\n",
        cache_dir.path().display()
    );
    let config_dir = tempdir();
    let config_path = config_dir.path().join("config.yml");
    fs::write(&config_path, yaml).unwrap();
    let config = filecacher::Config::get(Some(&config_path)).unwrap();

    let cache = CacheManager::new(config.cache).unwrap();
    assert_eq!(cache.config().max_count, 2);
    assert_eq!(cache.config().removal_priority, RemovalPriority::LargestFirst);
}
