//! S3-compatible blob storage.
//!
//! The [`AwsS3Module`] answers to the `aws.s3` prefix:
//!
//! ```text
//! aws.s3://bucket=logs;region=eu-west-1
//! aws.s3://bucket=test;keyId=minioadmin;key=minioadmin;serviceUrl=http://localhost:9000
//! ```

mod store;

use std::sync::Arc;

use async_trait::async_trait;
use fluent_core::{
    ExternalModule, ModuleCapabilities, ResolveError, StorageConnectionString, StorageFactory,
    Store,
};

pub use store::{DEFAULT_REGION, S3Store, S3StoreConfig};

pub const PREFIX: &str = "aws.s3";

#[derive(Debug, Default, Clone, Copy)]
pub struct AwsS3Module;

/// Adds [`AwsS3Module`] to `factory`.
pub fn register(factory: &mut StorageFactory) {
    factory.register_module(AwsS3Module);
}

#[async_trait]
impl ExternalModule for AwsS3Module {
    fn name(&self) -> &'static str {
        "aws"
    }

    fn prefixes(&self) -> &'static [&'static str] {
        &[PREFIX]
    }

    fn capabilities(&self) -> ModuleCapabilities {
        ModuleCapabilities::blob_storage()
    }

    async fn try_create_store(
        &self,
        cs: &StorageConnectionString,
    ) -> Result<Option<Arc<dyn Store>>, ResolveError> {
        if !self.handles(cs) {
            return Ok(None);
        }
        let config = S3StoreConfig::from_connection_string(cs)?;
        let store = S3Store::connect(config)
            .await
            .map_err(ResolveError::Backend)?;
        Ok(Some(Arc::new(store)))
    }
}
