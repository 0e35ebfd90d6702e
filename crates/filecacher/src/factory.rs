use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;
use tempfile::NamedTempFile;
use tokio::fs::File;

/// Number of random bytes in the name of a cache file.
const RANDOM_NAME_LEN: usize = 16;

/// Writes the contents of a cache entry.
///
/// Producers are stateless with regards to the cache and may be invoked any number of times, once
/// per population of a key. The `sink` is a freshly created, empty file.
pub trait CacheProducer: Send + Sync + 'static {
    /// Writes the value into `sink`.
    fn produce<'a>(&'a self, sink: &'a mut File) -> BoxFuture<'a, anyhow::Result<()>>;
}

struct FnProducer<F>(F);

impl<F> CacheProducer for FnProducer<F>
where
    F: for<'a> Fn(&'a mut File) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync + 'static,
{
    fn produce<'a>(&'a self, sink: &'a mut File) -> BoxFuture<'a, anyhow::Result<()>> {
        (self.0)(sink)
    }
}

/// Describes how to produce the bytes of a cache entry, and how to name its file.
///
/// Cache files are named `prefix + random identifier + suffix`, the default being
/// `cache<random>.tmp`.
#[derive(Clone)]
pub struct CacheFactory {
    producer: Arc<dyn CacheProducer>,
    prefix: String,
    suffix: String,
}

impl CacheFactory {
    /// Creates a factory from an async closure.
    ///
    /// ```
    /// use filecacher::CacheFactory;
    /// use futures::FutureExt;
    /// use tokio::io::AsyncWriteExt;
    ///
    /// let factory = CacheFactory::new(|sink| {
    ///     async move {
    ///         sink.write_all(b"expensive").await?;
    ///         anyhow::Ok(())
    ///     }
    ///     .boxed()
    /// });
    /// ```
    pub fn new<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut File) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync + 'static,
    {
        Self::from_producer(FnProducer(f))
    }

    /// Creates a factory from a [`CacheProducer`] implementation.
    pub fn from_producer(producer: impl CacheProducer) -> Self {
        Self {
            producer: Arc::new(producer),
            prefix: "cache".into(),
            suffix: ".tmp".into(),
        }
    }

    /// Sets the filename prefix and suffix of the produced cache files.
    pub fn with_filename(mut self, prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self.suffix = suffix.into();
        self
    }

    /// The filename prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The filename suffix.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub(crate) async fn produce(&self, sink: &mut File) -> anyhow::Result<()> {
        self.producer.produce(sink).await
    }

    /// Creates a new, uniquely named file in `directory`.
    ///
    /// The random part of the name is regenerated on collision. The file is deleted again when the
    /// returned handle is dropped without being kept.
    pub(crate) fn tempfile_in(&self, directory: &Path) -> io::Result<NamedTempFile> {
        tempfile::Builder::new()
            .prefix(&self.prefix)
            .suffix(&self.suffix)
            .rand_bytes(RANDOM_NAME_LEN)
            .tempfile_in(directory)
    }
}

impl fmt::Debug for CacheFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheFactory")
            .field("prefix", &self.prefix)
            .field("suffix", &self.suffix)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;
    use tokio::io::AsyncWriteExt;

    use super::*;

    fn factory() -> CacheFactory {
        CacheFactory::new(|sink| {
            async move {
                sink.write_all(b"hi").await?;
                anyhow::Ok(())
            }
            .boxed()
        })
    }

    #[test]
    fn test_default_filename() {
        let dir = filecacher_test::tempdir();
        let file = factory().tempfile_in(dir.path()).unwrap();

        let name = file.path().file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("cache"));
        assert!(name.ends_with(".tmp"));
        assert_eq!(name.len(), "cache".len() + RANDOM_NAME_LEN + ".tmp".len());
    }

    #[test]
    fn test_unique_filenames() {
        let dir = filecacher_test::tempdir();
        let factory = factory().with_filename("img-", ".png");

        let first = factory.tempfile_in(dir.path()).unwrap();
        let second = factory.tempfile_in(dir.path()).unwrap();
        assert_ne!(first.path(), second.path());

        let name = first.path().file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("img-"));
        assert!(name.ends_with(".png"));
    }

    #[tokio::test]
    async fn test_produce() {
        let dir = filecacher_test::tempdir();
        let path = dir.path().join("produced");
        let mut file = File::create(&path).await.unwrap();

        factory().produce(&mut file).await.unwrap();
        file.flush().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"hi");
    }
}
