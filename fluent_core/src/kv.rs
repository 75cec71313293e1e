use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use crate::store::{Store, StoreError};

/// A mutable key-value store.
///
/// Keys are arbitrary UTF-8 strings; values are opaque bytes. Writes to an
/// existing key replace the previous value.
#[async_trait]
pub trait KeyValueStore: std::fmt::Debug + Send + Sync {
    /// Returns the value stored under `key`, or `None` if there is none.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    async fn put(&self, key: &str, value: Bytes) -> Result<()>;

    /// Removes `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// All keys currently stored, in no particular order.
    async fn keys(&self) -> Result<Vec<String>>;
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        (**self).put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        (**self).keys().await
    }
}

/// A key-value store backed by a generic blob [`Store`].
///
/// Every entry is a single object whose path is the hex encoding of the key
/// under a common prefix, so keys never clash with path syntax.
#[derive(Debug, Clone)]
pub struct StoreKeyValue {
    store: Arc<dyn Store>,
    prefix: String,
}

impl StoreKeyValue {
    pub fn new(store: Arc<dyn Store>, prefix: Option<String>) -> Self {
        Self {
            store,
            prefix: prefix.unwrap_or_else(|| "kv".to_string()),
        }
    }

    fn key_path(&self, key: &str) -> String {
        format!("{}/{}", self.prefix, hex::encode(key.as_bytes()))
    }

    fn key_from_path(&self, path: &str) -> Option<Result<String>> {
        let encoded = path.strip_prefix(&self.prefix)?.strip_prefix('/')?;
        Some(
            hex::decode(encoded)
                .map_err(|err| anyhow!("invalid key path {path}: {err}"))
                .and_then(|raw| String::from_utf8(raw).context("key is not valid UTF-8")),
        )
    }
}

#[async_trait]
impl KeyValueStore for StoreKeyValue {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.key_path(key);
        match self.store.open_read_bytes(&path, 0, None).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if StoreError::is_not_found(&err) => Ok(None),
            Err(err) => Err(err.context(format!("failed to read key {key}"))),
        }
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        let path = self.key_path(key);
        self.store.put_bytes(&path, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.key_path(key);
        match self.store.delete(&path).await {
            Ok(()) => Ok(()),
            Err(err) if StoreError::is_not_found(&err) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut paths = self.store.list().await?;
        while let Some(path) = paths.next().await {
            let path = path?;
            if let Some(key) = self.key_from_path(&path) {
                keys.push(key?);
            }
        }
        Ok(keys)
    }
}
