use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use fluent_core::KeyValueStore;

/// In-memory key-value store.
///
/// Useful for testing and as a local cache layer.
#[derive(Debug, Default)]
pub struct MemoryKeyValue {
    data: RwLock<HashMap<String, Bytes>>,
}

impl MemoryKeyValue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValue {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let data = self.data.read().unwrap();
        Ok(data.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        let mut data = self.data.write().unwrap();
        data.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut data = self.data.write().unwrap();
        data.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let data = self.data.read().unwrap();
        Ok(data.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete() -> Result<()> {
        let kv = MemoryKeyValue::new();

        kv.put("user/1", Bytes::from("alice")).await?;
        kv.put("user/1", Bytes::from("bob")).await?;
        assert_eq!(kv.get("user/1").await?, Some(Bytes::from("bob")));
        assert_eq!(kv.keys().await?, vec!["user/1".to_string()]);

        kv.delete("user/1").await?;
        kv.delete("user/1").await?;
        assert_eq!(kv.get("user/1").await?, None);

        Ok(())
    }
}
