//! Configuration of the cache and its ambient services.
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, de};
use tracing::level_filters::LevelFilter;

/// Which capacity bound is enforced by eviction.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Bounds the number of committed entries to [`CacheConfig::max_count`].
    #[default]
    Count,
    /// Bounds the total size of the cache.
    ///
    /// This mode is currently not enforced, eviction only emits a diagnostic.
    Size,
}

/// The order in which unlocked entries are evicted.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPriority {
    /// Evicts small files before large ones.
    #[default]
    SmallestFirst,
    /// Evicts large files before small ones.
    LargestFirst,
}

/// The eviction policy and location of a cache.
///
/// A [`CacheManager`](crate::CacheManager) takes ownership of its config, it cannot be changed
/// afterwards.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding all the cache files. Will be created if it does not exist.
    pub directory: PathBuf,

    /// Which capacity bound to enforce.
    pub mode: CacheMode,

    /// The maximum number of committed entries in [`CacheMode::Count`].
    pub max_count: usize,

    /// Which entries to evict first.
    pub removal_priority: RemovalPriority,

    /// Deletes all files in [`directory`](Self::directory) when the manager is created.
    ///
    /// The mapping of keys to files only lives in memory, so files left over from a previous
    /// process are unreachable anyway.
    pub clear_on_startup: bool,

    /// Interval of the background eviction check.
    ///
    /// Eviction always runs after a new entry was committed, this additionally runs it
    /// periodically. See [`CacheManager::spawn_housekeeping`](crate::CacheManager::spawn_housekeeping).
    #[serde(with = "humantime_serde")]
    pub check_interval: Option<Duration>,

    /// Maximum time to wait for a concurrent computation of the same key.
    ///
    /// Only callers joining a running computation are affected, the computation itself is never
    /// interrupted. `None` waits indefinitely.
    #[serde(with = "humantime_serde")]
    pub wait_timeout: Option<Duration>,
}

impl CacheConfig {
    /// Creates a config bounding the cache to `max_count` entries.
    pub fn count(directory: impl Into<PathBuf>, max_count: usize) -> Self {
        Self {
            directory: directory.into(),
            mode: CacheMode::Count,
            max_count,
            ..Default::default()
        }
    }

    /// Sets the [`removal_priority`](Self::removal_priority).
    pub fn with_priority(mut self, removal_priority: RemovalPriority) -> Self {
        self.removal_priority = removal_priority;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("cache"),
            mode: CacheMode::Count,
            max_count: 10,
            removal_priority: RemovalPriority::SmallestFirst,
            clear_on_startup: true,
            check_interval: None,
            wait_timeout: None,
        }
    }
}

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "filecacher".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// The complete configuration file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The cache policy.
    pub cache: CacheConfig,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,
}

impl Config {
    /// Loads the config from the YAML file at `path`, or the defaults if no path is given.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
