//! Core fluent storage types and traits.
//!
//! This crate defines what every backend crate builds on and what
//! application code programs against:
//!
//! - Blob storage (`Store`, `StoreFeatures`, `StoreError`)
//! - Key-value storage (`KeyValueStore`) and a `Store`-backed adapter
//!   (`StoreKeyValue`)
//! - Queue messaging (`QueueMessage`, `MessagePublisher`, `MessageReceiver`,
//!   `Messenger`)
//!
//! ## Connection strings
//!
//! Backends are selected at runtime from a connection string such as
//! `disk://path=/var/data` or `aws.s3://bucket=logs;region=eu-west-1`.
//! `StorageConnectionString` parses and prints them. A `StorageFactory`
//! holds the registered vendor modules (`ExternalModule`) and resolves a
//! connection string to the first module that claims it.
//!
//! ## Large messages
//!
//! `LargeMessageOffloader` and `LargeMessageRehydrator` wrap any publisher
//! and receiver to move payloads that exceed a size limit into a blob
//! store and bring them back on receipt.

pub mod connection_string;
pub mod error;
pub mod factory;
pub mod kv;
pub mod messaging;
pub mod module;
pub mod store;

// Test utilities (behind feature flag)
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

// --- Core Public Surface ---

pub use connection_string::{ParseError, StorageConnectionString};
pub use error::ResolveError;
pub use factory::StorageFactory;
pub use kv::{KeyValueStore, StoreKeyValue};
pub use messaging::{
    LARGE_MESSAGE_CONTENT_HEADER, LargeMessageOffloader, LargeMessageRehydrator,
    MessagePublisher, MessageProcessor, MessageReceiver, MessagingError, MessagingExt,
    MessagingResult, Messenger, OffloadConfig, QueueMessage,
};
pub use module::{ExternalModule, ModuleCapabilities};
pub use store::{Store, StoreError, StoreFeatures, StoreResult};

// Re-exported so callers do not need a direct tokio-util dependency.
pub use tokio_util::sync::CancellationToken;
