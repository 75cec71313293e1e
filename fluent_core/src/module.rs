//! Vendor modules: factories that turn a connection string into a backend.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    StorageConnectionString, error::ResolveError, kv::KeyValueStore, messaging::Messenger,
    store::Store,
};

/// What a module is able to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModuleCapabilities {
    pub blob_storage: bool,
    pub key_value_storage: bool,
    pub messenger: bool,
}

impl ModuleCapabilities {
    pub const fn blob_storage() -> Self {
        Self {
            blob_storage: true,
            key_value_storage: false,
            messenger: false,
        }
    }

    pub const fn with_key_value(mut self) -> Self {
        self.key_value_storage = true;
        self
    }

    pub const fn with_messenger(mut self) -> Self {
        self.messenger = true;
        self
    }
}

/// A vendor-specific factory.
///
/// # Contract
///
/// Each `try_create_*` method returns `Ok(None)` when the connection string
/// is not meant for this module, which in practice means its prefix is not
/// one of [`ExternalModule::prefixes`]. That check must come before any
/// parameter lookup or I/O. Once the prefix matches, configuration problems
/// are reported as errors and stop dispatch; they are never turned into
/// `Ok(None)`.
#[async_trait]
pub trait ExternalModule: std::fmt::Debug + Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Prefixes this module answers to, compared case-insensitively.
    fn prefixes(&self) -> &'static [&'static str];

    fn capabilities(&self) -> ModuleCapabilities;

    /// Whether `cs` carries one of this module's prefixes.
    fn handles(&self, cs: &StorageConnectionString) -> bool {
        self.prefixes().iter().any(|prefix| cs.has_prefix(prefix))
    }

    async fn try_create_store(
        &self,
        _cs: &StorageConnectionString,
    ) -> Result<Option<Arc<dyn Store>>, ResolveError> {
        Ok(None)
    }

    async fn try_create_key_value(
        &self,
        _cs: &StorageConnectionString,
    ) -> Result<Option<Arc<dyn KeyValueStore>>, ResolveError> {
        Ok(None)
    }

    async fn try_create_messenger(
        &self,
        _cs: &StorageConnectionString,
    ) -> Result<Option<Arc<dyn Messenger>>, ResolveError> {
        Ok(None)
    }
}
