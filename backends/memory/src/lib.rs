//! In-memory backends.
//!
//! Everything here lives in process memory and disappears with it. The
//! [`InMemoryModule`] answers to the `inmemory` prefix and can build all
//! three backend kinds:
//!
//! ```text
//! inmemory://
//! inmemory://maxMessageSize=262144
//! ```
//!
//! Every resolution creates a fresh, unshared instance.

mod kv;
mod messenger;
mod store;

use std::sync::Arc;

use async_trait::async_trait;
use fluent_core::{
    ExternalModule, KeyValueStore, Messenger, ModuleCapabilities, ResolveError,
    StorageConnectionString, StorageFactory, Store,
};

pub use kv::MemoryKeyValue;
pub use messenger::MemoryMessenger;
pub use store::MemoryStore;

pub const PREFIX: &str = "inmemory";

#[derive(Debug, Default, Clone, Copy)]
pub struct InMemoryModule;

/// Adds [`InMemoryModule`] to `factory`.
pub fn register(factory: &mut StorageFactory) {
    factory.register_module(InMemoryModule);
}

#[async_trait]
impl ExternalModule for InMemoryModule {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn prefixes(&self) -> &'static [&'static str] {
        &[PREFIX]
    }

    fn capabilities(&self) -> ModuleCapabilities {
        ModuleCapabilities::blob_storage()
            .with_key_value()
            .with_messenger()
    }

    async fn try_create_store(
        &self,
        cs: &StorageConnectionString,
    ) -> Result<Option<Arc<dyn Store>>, ResolveError> {
        if !self.handles(cs) {
            return Ok(None);
        }
        Ok(Some(Arc::new(MemoryStore::new())))
    }

    async fn try_create_key_value(
        &self,
        cs: &StorageConnectionString,
    ) -> Result<Option<Arc<dyn KeyValueStore>>, ResolveError> {
        if !self.handles(cs) {
            return Ok(None);
        }
        Ok(Some(Arc::new(MemoryKeyValue::new())))
    }

    async fn try_create_messenger(
        &self,
        cs: &StorageConnectionString,
    ) -> Result<Option<Arc<dyn Messenger>>, ResolveError> {
        if !self.handles(cs) {
            return Ok(None);
        }
        let messenger = match cs.get_parsed::<usize>("maxMessageSize")? {
            Some(max) => MemoryMessenger::with_max_message_size(max),
            None => MemoryMessenger::new(),
        };
        Ok(Some(Arc::new(messenger)))
    }
}
