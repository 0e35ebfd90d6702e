use std::cmp::Reverse;
use std::sync::Arc;

use crate::{CacheEntry, RemovalPriority};

/// Orders entries from "first to evict" to "last to evict", skipping locked entries.
///
/// Entries of equal size keep their relative order.
pub(crate) fn eviction_candidates<'a>(
    entries: impl IntoIterator<Item = &'a Arc<CacheEntry>>,
    priority: RemovalPriority,
) -> Vec<Arc<CacheEntry>> {
    let mut candidates: Vec<_> = entries.into_iter().map(Arc::clone).collect();
    match priority {
        RemovalPriority::SmallestFirst => candidates.sort_by_cached_key(|entry| entry.size()),
        RemovalPriority::LargestFirst => {
            candidates.sort_by_cached_key(|entry| Reverse(entry.size()))
        }
    }
    candidates.retain(|entry| !entry.is_locked());
    candidates
}
