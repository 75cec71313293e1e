//! Resolution of connection strings to backends.
//!
//! A [`StorageFactory`] holds an ordered list of [`ExternalModule`]s. To
//! resolve a connection string it asks each module in registration order;
//! the first one that returns a backend wins. Registration order therefore
//! decides precedence when two modules could claim the same prefix.
//!
//! The factory is a plain value: build it once at startup and pass it to
//! whatever needs to resolve connection strings.

use std::{fmt, sync::Arc};

use futures::future::BoxFuture;
use tracing::{debug, trace};

use crate::{
    StorageConnectionString,
    error::ResolveError,
    kv::KeyValueStore,
    messaging::Messenger,
    module::{ExternalModule, ModuleCapabilities},
    store::Store,
};

#[derive(Clone, Default)]
pub struct StorageFactory {
    modules: Vec<Arc<dyn ExternalModule>>,
}

impl fmt::Debug for StorageFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageFactory")
            .field(
                "modules",
                &self.modules.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl StorageFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a module. Modules registered earlier take precedence.
    pub fn register_module<M>(&mut self, module: M) -> &mut Self
    where
        M: ExternalModule + 'static,
    {
        self.register_shared(Arc::new(module))
    }

    pub fn register_shared(&mut self, module: Arc<dyn ExternalModule>) -> &mut Self {
        debug!(
            module = module.name(),
            prefixes = ?module.prefixes(),
            "registering storage module"
        );
        self.modules.push(module);
        self
    }

    /// Builder form of [`StorageFactory::register_module`].
    pub fn with_module<M>(mut self, module: M) -> Self
    where
        M: ExternalModule + 'static,
    {
        self.register_module(module);
        self
    }

    pub fn modules(&self) -> &[Arc<dyn ExternalModule>] {
        &self.modules
    }

    pub async fn resolve_store(&self, text: &str) -> Result<Arc<dyn Store>, ResolveError> {
        let cs = StorageConnectionString::parse(text)?;
        self.resolve_store_from(&cs).await
    }

    pub async fn resolve_store_from(
        &self,
        cs: &StorageConnectionString,
    ) -> Result<Arc<dyn Store>, ResolveError> {
        self.dispatch(cs).await
    }

    pub async fn resolve_messenger(&self, text: &str) -> Result<Arc<dyn Messenger>, ResolveError> {
        let cs = StorageConnectionString::parse(text)?;
        self.resolve_messenger_from(&cs).await
    }

    pub async fn resolve_messenger_from(
        &self,
        cs: &StorageConnectionString,
    ) -> Result<Arc<dyn Messenger>, ResolveError> {
        self.dispatch(cs).await
    }

    pub async fn resolve_key_value(
        &self,
        text: &str,
    ) -> Result<Arc<dyn KeyValueStore>, ResolveError> {
        let cs = StorageConnectionString::parse(text)?;
        self.resolve_key_value_from(&cs).await
    }

    pub async fn resolve_key_value_from(
        &self,
        cs: &StorageConnectionString,
    ) -> Result<Arc<dyn KeyValueStore>, ResolveError> {
        self.dispatch(cs).await
    }

    async fn dispatch<T: Resolvable>(&self, cs: &StorageConnectionString) -> Result<T, ResolveError> {
        // first non-critical failure, reported if nobody else claims the string
        let mut deferred = None;

        for module in &self.modules {
            if !T::supported_by(module.capabilities()) {
                continue;
            }
            match T::create(module.as_ref(), cs).await {
                Ok(Some(backend)) => {
                    debug!(
                        module = module.name(),
                        prefix = cs.prefix(),
                        kind = T::KIND,
                        "resolved connection string"
                    );
                    return Ok(backend);
                }
                Ok(None) => {
                    trace!(module = module.name(), prefix = cs.prefix(), "not claimed");
                }
                Err(err) if !err.halts_dispatch() => {
                    debug!(module = module.name(), "skipping module: {err}");
                    deferred.get_or_insert(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(deferred.unwrap_or_else(|| ResolveError::UnrecognizedPrefix {
            prefix: cs.prefix().to_string(),
        }))
    }
}

/// A backend kind the factory can resolve.
trait Resolvable: Sized {
    const KIND: &'static str;

    fn supported_by(capabilities: ModuleCapabilities) -> bool;

    fn create<'a>(
        module: &'a dyn ExternalModule,
        cs: &'a StorageConnectionString,
    ) -> BoxFuture<'a, Result<Option<Self>, ResolveError>>;
}

impl Resolvable for Arc<dyn Store> {
    const KIND: &'static str = "blob storage";

    fn supported_by(capabilities: ModuleCapabilities) -> bool {
        capabilities.blob_storage
    }

    fn create<'a>(
        module: &'a dyn ExternalModule,
        cs: &'a StorageConnectionString,
    ) -> BoxFuture<'a, Result<Option<Self>, ResolveError>> {
        module.try_create_store(cs)
    }
}

impl Resolvable for Arc<dyn KeyValueStore> {
    const KIND: &'static str = "key-value storage";

    fn supported_by(capabilities: ModuleCapabilities) -> bool {
        capabilities.key_value_storage
    }

    fn create<'a>(
        module: &'a dyn ExternalModule,
        cs: &'a StorageConnectionString,
    ) -> BoxFuture<'a, Result<Option<Self>, ResolveError>> {
        module.try_create_key_value(cs)
    }
}

impl Resolvable for Arc<dyn Messenger> {
    const KIND: &'static str = "messenger";

    fn supported_by(capabilities: ModuleCapabilities) -> bool {
        capabilities.messenger
    }

    fn create<'a>(
        module: &'a dyn ExternalModule,
        cs: &'a StorageConnectionString,
    ) -> BoxFuture<'a, Result<Option<Self>, ResolveError>> {
        module.try_create_messenger(cs)
    }
}
