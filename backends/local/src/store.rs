use anyhow::{Context, anyhow};
use bytes::Bytes;
use fluent_core::store::{ByteStream, PathStream, PutResponse, StoreFeatures, StoreResult};
use fluent_core::{ResolveError, StorageConnectionString};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalStoreConfig {
    pub base_path: String,
}

impl LocalStoreConfig {
    /// Reads the required `path` parameter.
    pub fn from_connection_string(cs: &StorageConnectionString) -> Result<Self, ResolveError> {
        let base_path = cs.get_required("path", true)?;
        if base_path.is_empty() {
            return Err(ResolveError::InvalidParameter {
                key: "path".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(Self {
            base_path: base_path.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct LocalStore {
    base_path: PathBuf,
}

impl LocalStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        LocalStore {
            base_path: base_path.into(),
        }
    }

    pub fn create(config: LocalStoreConfig) -> Self {
        debug!(base_path = %config.base_path, "opening local store");
        Self::new(config.base_path)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn resolve_path(&self, path: &str) -> StoreResult<PathBuf> {
        if path.contains("..") || path.starts_with('/') {
            return Err(anyhow!(
                "Invalid path: '{}'. Must be a relative path without '..'.",
                path
            ));
        }
        Ok(self.base_path.join(path))
    }
}

/// Turns an on-disk path below `base` into a `/`-separated store path.
fn store_path(base: &Path, full: &Path) -> Result<String, std::io::Error> {
    let relative = full.strip_prefix(base).map_err(|_| {
        std::io::Error::other(format!(
            "{} is outside of {}",
            full.display(),
            base.display()
        ))
    })?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    Ok(parts.join("/"))
}

#[async_trait::async_trait]
impl fluent_core::store::Store for LocalStore {
    /// Writes a stream of bytes to a file.
    async fn put_stream(&self, path: &str, stream: ByteStream) -> StoreResult<PutResponse> {
        let full_path = self.resolve_path(path)?;
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = File::create(&full_path).await?;
        let mut stream_reader = StreamReader::new(stream);
        tokio::io::copy(&mut stream_reader, &mut file).await?;
        Ok(())
    }

    /// Returns the features of this store.
    fn features(&self) -> StoreFeatures {
        StoreFeatures {
            case_sensitive: false,
            supports_rename: true,
        }
    }

    /// Checks if a file exists at the given path.
    async fn exists(&self, path: &str) -> StoreResult<bool> {
        let full_path = self.resolve_path(path)?;
        tokio::fs::try_exists(&full_path).await.map_err(Into::into)
    }

    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<PutResponse> {
        let full_path = self.resolve_path(path)?;
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&full_path, &bytes).await?;
        Ok(())
    }

    async fn open_read_stream(
        &self,
        path: &str,
        offset: u64,
        max_len: Option<u64>,
    ) -> StoreResult<ByteStream> {
        let full_path = self.resolve_path(path)?;
        let mut file = File::open(&full_path).await?;

        if offset > 0 {
            file.seek(std::io::SeekFrom::Start(offset)).await?;
        }

        let reader: Box<dyn tokio::io::AsyncRead + Send + Unpin> = if let Some(len) = max_len {
            Box::new(file.take(len))
        } else {
            Box::new(file)
        };

        let stream = ReaderStream::new(reader);

        Ok(Box::new(stream))
    }

    async fn open_read_bytes(
        &self,
        path: &str,
        offset: u64,
        max_len: Option<u64>,
    ) -> StoreResult<Bytes> {
        let full_path = self.resolve_path(path)?;
        let mut file = File::open(&full_path).await?;
        let file_len = file.metadata().await?.len();

        if offset >= file_len {
            return Ok(Bytes::new());
        }

        file.seek(std::io::SeekFrom::Start(offset)).await?;

        let len_to_read = match max_len {
            Some(len) => std::cmp::min(len, file_len - offset),
            None => file_len - offset,
        };

        let capacity =
            usize::try_from(len_to_read).context("file segment too large to read into memory")?;
        let mut buffer = Vec::with_capacity(capacity);

        file.take(len_to_read).read_to_end(&mut buffer).await?;

        Ok(Bytes::from(buffer))
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        let full_path = self.resolve_path(path)?;
        match tokio::fs::metadata(&full_path).await {
            Ok(_metadata) => {
                tokio::fs::remove_file(&full_path).await?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> StoreResult<()> {
        let old_full_path = self.resolve_path(old_path)?;
        let new_full_path = self.resolve_path(new_path)?;

        if let Some(parent) = new_full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::rename(&old_full_path, &new_full_path).await?;
        Ok(())
    }

    async fn size(&self, path: &str) -> StoreResult<u64> {
        let full_path = self.resolve_path(path)?;
        Ok(tokio::fs::metadata(&full_path).await?.len())
    }

    async fn list(&self) -> StoreResult<PathStream> {
        let base_path = self.base_path.clone();
        if !tokio::fs::try_exists(&base_path).await? {
            return Ok(Box::new(futures::stream::empty::<Result<String, std::io::Error>>()));
        }
        let walker = WalkDir::new(&base_path).into_iter();
        let stream = futures::stream::iter(walker).filter_map(move |entry| {
            futures::future::ready(match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    Some(store_path(&base_path, entry.path()))
                }
                Ok(_) => None,
                Err(e) => Some(Err(e.into())),
            })
        });

        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluent_core::Store;
    use fluent_core::testutil::StoreTests;

    #[tokio::test]
    async fn test_local_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(temp_dir.path());
        StoreTests::new(&store).run_all().await.unwrap();
    }

    #[tokio::test]
    async fn nested_prefix_creates_directories() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(temp_dir.path());
        StoreTests::with_prefix(&store, "nested/run/")
            .run_all()
            .await
            .unwrap();
        assert!(temp_dir.path().join("nested/run").is_dir());
    }

    #[tokio::test]
    async fn rejects_escaping_paths() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(temp_dir.path());
        assert!(store.put_bytes("../outside", Bytes::new()).await.is_err());
        assert!(store.put_bytes("/abs", Bytes::new()).await.is_err());
    }

    #[tokio::test]
    async fn list_of_missing_root_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(temp_dir.path().join("not-yet"));
        let paths: Vec<_> = store.list().await.unwrap().collect().await;
        assert!(paths.is_empty());
    }

    #[test]
    fn config_requires_path() {
        let cs = StorageConnectionString::parse("disk://path=/var/data").unwrap();
        let config = LocalStoreConfig::from_connection_string(&cs).unwrap();
        assert_eq!(config.base_path, "/var/data");

        let cs = StorageConnectionString::parse("disk://").unwrap();
        assert!(matches!(
            LocalStoreConfig::from_connection_string(&cs),
            Err(ResolveError::MissingParameter { ref key, critical: true }) if key == "path"
        ));

        let cs = StorageConnectionString::parse("disk://path=").unwrap();
        assert!(matches!(
            LocalStoreConfig::from_connection_string(&cs),
            Err(ResolveError::InvalidParameter { .. })
        ));
    }
}
