use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

pub type StoreResult<T, E = anyhow::Error> = std::result::Result<T, E>;

pub type ByteStream = Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send + Unpin + 'static>;

pub type PathStream = Box<dyn Stream<Item = Result<String, std::io::Error>> + Send + Unpin + 'static>;

/// Errors a [`Store`] reports in a backend-independent way.
///
/// Backends wrap these in [`anyhow::Error`]; callers that care about a
/// specific condition use [`StoreError::is_not_found`].
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    #[error("object not found")]
    NotFound,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    /// Returns true if `err` (or anything in its chain) is [`StoreError::NotFound`]
    /// or an io error of kind `NotFound`.
    pub fn is_not_found(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            if let Some(StoreError::NotFound) = cause.downcast_ref::<StoreError>() {
                return true;
            }
            matches!(
                cause.downcast_ref::<std::io::Error>(),
                Some(io) if io.kind() == std::io::ErrorKind::NotFound
            )
        })
    }
}

/// A flat blob store addressed by `/`-separated relative paths.
///
/// This is the collaborator every backend implements and the one the
/// large-message decorators write offloaded payloads into. Implementations
/// must allow concurrent writes to distinct paths without coordination.
#[async_trait]
pub trait Store: std::fmt::Debug + Send + Sync + 'static {
    async fn put_stream(&self, path: &str, stream: ByteStream) -> StoreResult<PutResponse>;

    fn features(&self) -> StoreFeatures;

    async fn exists(&self, path: &str) -> StoreResult<bool>;

    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<PutResponse>;

    async fn open_read_stream(
        &self,
        path: &str,
        offset: u64,
        max_len: Option<u64>,
    ) -> StoreResult<ByteStream>;

    /// Reads `max_len` bytes starting at `offset`, or everything after
    /// `offset` when `max_len` is `None`. Fails with [`StoreError::NotFound`]
    /// if nothing is stored at `path`.
    async fn open_read_bytes(
        &self,
        path: &str,
        offset: u64,
        max_len: Option<u64>,
    ) -> StoreResult<Bytes>;

    async fn size(&self, path: &str) -> StoreResult<u64>;

    async fn list(&self) -> StoreResult<PathStream>;

    async fn delete(&self, path: &str) -> StoreResult<()>;

    async fn rename(&self, old_path: &str, new_path: &str) -> StoreResult<()>;
}

#[async_trait]
impl<T: Store + ?Sized> Store for std::sync::Arc<T> {
    async fn put_stream(&self, path: &str, stream: ByteStream) -> StoreResult<PutResponse> {
        (**self).put_stream(path, stream).await
    }

    fn features(&self) -> StoreFeatures {
        (**self).features()
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        (**self).exists(path).await
    }

    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<PutResponse> {
        (**self).put_bytes(path, bytes).await
    }

    async fn open_read_stream(
        &self,
        path: &str,
        offset: u64,
        max_len: Option<u64>,
    ) -> StoreResult<ByteStream> {
        (**self).open_read_stream(path, offset, max_len).await
    }

    async fn open_read_bytes(
        &self,
        path: &str,
        offset: u64,
        max_len: Option<u64>,
    ) -> StoreResult<Bytes> {
        (**self).open_read_bytes(path, offset, max_len).await
    }

    async fn size(&self, path: &str) -> StoreResult<u64> {
        (**self).size(path).await
    }

    async fn list(&self) -> StoreResult<PathStream> {
        (**self).list().await
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        (**self).delete(path).await
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> StoreResult<()> {
        (**self).rename(old_path, new_path).await
    }
}

pub type PutResponse = ();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreFeatures {
    pub supports_rename: bool,
    pub case_sensitive: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_detected_through_context() {
        let err = anyhow::Error::from(StoreError::NotFound).context("reading blob");
        assert!(StoreError::is_not_found(&err));

        let io = anyhow::Error::from(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(StoreError::is_not_found(&io));

        let other = anyhow::anyhow!("connection reset");
        assert!(!StoreError::is_not_found(&other));
    }
}
