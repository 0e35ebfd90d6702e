//! Exposes the command line application.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use filecacher::{CacheFactory, CacheManager, Config, TracingListener, metrics};
use futures::FutureExt;

use crate::logging;

/// Filecacher commands.
#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Copy local files into the cache, keyed by their path.
    ///
    /// The configured eviction policy is applied after every file. Afterwards, the surviving
    /// entries are printed.
    Ingest {
        /// The files to cache.
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,

        /// Re-read files that are already cached.
        #[arg(long)]
        refresh: bool,
    },

    /// Delete all files from the cache directory.
    Clear,
}

/// A disk-backed content cache.
#[derive(Clone, Debug, Parser)]
#[command(author, version, about, bin_name = "filecacher")]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    // SAFETY: The runtime has not been started yet, so this is single-threaded.
    unsafe { logging::init_logging(&config) };
    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd,
            config.metrics.custom_tags.clone(),
        )
        .context("failed to configure statsd")?;
    }

    match cli.command {
        Command::Ingest { files, refresh } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .thread_name("filecacher-worker")
                .build()
                .context("failed to start the runtime")?;
            runtime.block_on(ingest(config, files, refresh))?;
        }
        Command::Clear => {
            let stats = filecacher::sweep(&config.cache.directory, &TracingListener)
                .context("failed to clear the cache directory")?;
            println!(
                "removed {} files ({} bytes), {} failed",
                stats.removed_files, stats.removed_bytes, stats.failed_files
            );
        }
    }

    Ok(())
}

/// Creates a factory that copies `source` into the cache.
fn file_factory(source: PathBuf) -> CacheFactory {
    let source = Arc::new(source);
    CacheFactory::new(move |sink| {
        let source = Arc::clone(&source);
        async move {
            let mut file = tokio::fs::File::open(&*source)
                .await
                .with_context(|| format!("failed to open `{}`", source.display()))?;
            tokio::io::copy(&mut file, sink).await?;
            anyhow::Ok(())
        }
        .boxed()
    })
}

async fn ingest(config: Config, files: Vec<PathBuf>, refresh: bool) -> Result<()> {
    let cache = CacheManager::new(config.cache).context("failed to open the cache directory")?;
    let _housekeeping = cache.spawn_housekeeping();

    for source in files {
        let key = source.display().to_string();
        let factory = file_factory(source);
        let result = if refresh {
            cache.populate(&key, &factory, false).await
        } else {
            cache.get(&key, &factory, false).await
        };

        match result {
            Ok(entry) => tracing::info!(key = key.as_str(), size = entry.size(), "Cached file"),
            Err(error) => tracing::error!(
                key = key.as_str(),
                error = &error as &dyn std::error::Error,
                "Failed to cache file"
            ),
        }
    }

    let mut keys = cache.keys();
    keys.sort();
    for key in keys {
        let Some(entry) = cache.lookup(&key, false) else {
            continue;
        };
        let path = entry.path().unwrap_or_default();
        println!("{:>10}  {}  ->  {}", entry.size(), key, path.display());
    }
    println!(
        "{} entries, {} bytes",
        cache.total_count(),
        cache.total_size()
    );

    Ok(())
}
