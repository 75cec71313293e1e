//! Local filesystem backend.
//!
//! Objects are plain files below a base directory, named by their store
//! path. The [`DiskModule`] answers to the `disk` prefix:
//!
//! ```text
//! disk://path=/var/lib/app/blobs
//! ```
//!
//! Key-value storage on disk is a [`StoreKeyValue`] over the same layout,
//! with entries kept under the `kv/` directory (override with `kvPrefix`).

mod store;

use std::sync::Arc;

use async_trait::async_trait;
use fluent_core::{
    ExternalModule, KeyValueStore, ModuleCapabilities, ResolveError, StorageConnectionString,
    StorageFactory, Store, StoreKeyValue,
};

pub use store::{LocalStore, LocalStoreConfig};

pub const PREFIX: &str = "disk";

#[derive(Debug, Default, Clone, Copy)]
pub struct DiskModule;

/// Adds [`DiskModule`] to `factory`.
pub fn register(factory: &mut StorageFactory) {
    factory.register_module(DiskModule);
}

impl DiskModule {
    fn open(cs: &StorageConnectionString) -> Result<LocalStore, ResolveError> {
        LocalStoreConfig::from_connection_string(cs).map(LocalStore::create)
    }
}

#[async_trait]
impl ExternalModule for DiskModule {
    fn name(&self) -> &'static str {
        "local"
    }

    fn prefixes(&self) -> &'static [&'static str] {
        &[PREFIX]
    }

    fn capabilities(&self) -> ModuleCapabilities {
        ModuleCapabilities::blob_storage().with_key_value()
    }

    async fn try_create_store(
        &self,
        cs: &StorageConnectionString,
    ) -> Result<Option<Arc<dyn Store>>, ResolveError> {
        if !self.handles(cs) {
            return Ok(None);
        }
        Ok(Some(Arc::new(Self::open(cs)?)))
    }

    async fn try_create_key_value(
        &self,
        cs: &StorageConnectionString,
    ) -> Result<Option<Arc<dyn KeyValueStore>>, ResolveError> {
        if !self.handles(cs) {
            return Ok(None);
        }
        let store: Arc<dyn Store> = Arc::new(Self::open(cs)?);
        let prefix = cs.get("kvPrefix").map(str::to_string);
        Ok(Some(Arc::new(StoreKeyValue::new(store, prefix))))
    }
}
