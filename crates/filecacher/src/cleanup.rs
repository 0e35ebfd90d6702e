use std::fs::{DirEntry, read_dir, remove_file};
use std::io;
use std::path::Path;

use crate::{CacheError, CacheListener};
use crate::utils::catch_not_found;

/// Statistics of a [`sweep`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Number of deleted files.
    pub removed_files: usize,
    /// Total size of the deleted files.
    pub removed_bytes: u64,
    /// Number of files that could not be deleted.
    pub failed_files: usize,
}

/// Deletes all files directly inside `directory`.
///
/// The key to file mapping of a cache only lives in memory, so all files left behind by a previous
/// process are garbage. Subdirectories are left alone. Failures to delete individual files are
/// reported to `listener` and do not stop the sweep. A missing directory is not an error.
pub fn sweep(directory: &Path, listener: &dyn CacheListener) -> io::Result<SweepStats> {
    let mut stats = SweepStats::default();

    let Some(entries) = catch_not_found(|| read_dir(directory))? else {
        tracing::warn!("Directory not found: `{}`", directory.display());
        return Ok(stats);
    };
    tracing::debug!("Sweeping cache directory `{}`", directory.display());

    for entry in entries {
        sweep_entry(entry, &mut stats, listener);
    }

    tracing::info!(
        "Removed {} files from `{}`, totaling {} bytes",
        stats.removed_files,
        directory.display(),
        stats.removed_bytes,
    );
    metric!(counter("caches.sweep.files_removed") += stats.removed_files as i64);
    metric!(counter("caches.sweep.bytes_removed") += stats.removed_bytes as i64);

    Ok(stats)
}

/// Deletes a single file found by [`sweep`], recording the outcome in `stats`.
fn sweep_entry(
    entry: io::Result<DirEntry>,
    stats: &mut SweepStats,
    listener: &dyn CacheListener,
) {
    let path = match entry {
        Ok(entry) => entry.path(),
        Err(e) => {
            tracing::debug!("Failed to read directory entry");
            stats.failed_files += 1;
            listener.on_error(&CacheError::from(e));
            return;
        }
    };
    if path.is_dir() {
        return;
    }

    let size = path.metadata().map(|md| md.len()).unwrap_or_default();
    tracing::trace!("Removing file `{}`", path.display());
    match catch_not_found(|| remove_file(&path)) {
        Ok(_) => {
            stats.removed_files += 1;
            stats.removed_bytes += size;
        }
        Err(e) => {
            tracing::debug!("Failed to remove file `{}`", path.display());
            stats.failed_files += 1;
            listener.on_error(&CacheError::from(e));
        }
    }
}
