//! Large-message offloading.
//!
//! Most transports cap the size of a single message. [`LargeMessageOffloader`]
//! wraps a publisher and moves any payload above a threshold into a blob
//! [`Store`], sending only a pointer property in its place.
//! [`LargeMessageRehydrator`] wraps the receiving side, fetches the payload
//! back and strips the pointer before the application sees the message.
//!
//! ## Failure handling
//!
//! Blob writes for a batch complete before the batch is handed to the inner
//! publisher, so a failed write never results in a published pointer to
//! missing content. If the publish itself fails the already written blobs
//! stay behind as garbage unless [`OffloadConfig::cleanup_on_publish_failure`]
//! is set, in which case they are deleted on a best-effort basis. Nothing is
//! retried here; retry policy belongs to the caller.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::{
    LARGE_MESSAGE_CONTENT_HEADER, LARGE_MESSAGE_LENGTH_HEADER, MessagePublisher, MessageProcessor,
    MessageReceiver, MessagingError, MessagingResult, QueueMessage, cancellable,
};
use crate::{StorageConnectionString, error::ResolveError, store::Store};

/// Service Bus standard tier limit, a common lowest denominator.
pub const DEFAULT_MAX_INLINE_SIZE: usize = 256 * 1024;

pub const DEFAULT_KEY_PREFIX: &str = "large-messages";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffloadConfig {
    /// Largest payload, in bytes, sent inline. Anything longer is offloaded.
    pub max_inline_size: usize,
    /// Directory in the blob store that offloaded payloads are written to.
    pub key_prefix: String,
    /// Delete freshly written blobs when the inner publish fails.
    pub cleanup_on_publish_failure: bool,
    /// Delete the backing blob once a message has been processed by
    /// [`LargeMessageRehydrator::deliver`].
    pub delete_after_rehydrate: bool,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            max_inline_size: DEFAULT_MAX_INLINE_SIZE,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            cleanup_on_publish_failure: false,
            delete_after_rehydrate: false,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum OffloadConfigError {
    #[error("max inline size must be greater than zero")]
    ZeroThreshold,

    #[error("key prefix '{0}' must be a relative path without '..'")]
    InvalidKeyPrefix(String),
}

impl OffloadConfig {
    pub fn new(max_inline_size: usize) -> Self {
        Self {
            max_inline_size,
            ..Default::default()
        }
    }

    /// Reads the optional `maxInlineSize`, `keyPrefix`,
    /// `cleanupOnPublishFailure` and `deleteAfterRehydrate` parameters.
    pub fn from_connection_string(cs: &StorageConnectionString) -> Result<Self, ResolveError> {
        let defaults = Self::default();
        let config = Self {
            max_inline_size: cs
                .get_parsed("maxInlineSize")?
                .unwrap_or(defaults.max_inline_size),
            key_prefix: cs
                .get("keyPrefix")
                .map(str::to_string)
                .unwrap_or(defaults.key_prefix),
            cleanup_on_publish_failure: cs
                .get_parsed("cleanupOnPublishFailure")?
                .unwrap_or(defaults.cleanup_on_publish_failure),
            delete_after_rehydrate: cs
                .get_parsed("deleteAfterRehydrate")?
                .unwrap_or(defaults.delete_after_rehydrate),
        };
        config
            .validate()
            .map_err(|err| ResolveError::InvalidParameter {
                key: match err {
                    OffloadConfigError::ZeroThreshold => "maxInlineSize".to_string(),
                    OffloadConfigError::InvalidKeyPrefix(_) => "keyPrefix".to_string(),
                },
                reason: err.to_string(),
            })?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), OffloadConfigError> {
        if self.max_inline_size == 0 {
            return Err(OffloadConfigError::ZeroThreshold);
        }
        if self.key_prefix.starts_with('/') || self.key_prefix.contains("..") {
            return Err(OffloadConfigError::InvalidKeyPrefix(self.key_prefix.clone()));
        }
        Ok(())
    }

    fn new_blob_key(&self) -> String {
        let prefix = self.key_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            format!("{prefix}/{}", Uuid::new_v4())
        }
    }
}

/// Publisher decorator that offloads oversized payloads to a blob store.
#[derive(Debug, Clone)]
pub struct LargeMessageOffloader<P> {
    inner: P,
    store: Arc<dyn Store>,
    config: OffloadConfig,
}

impl<P: MessagePublisher> LargeMessageOffloader<P> {
    /// Offloads every message whose content is longer than
    /// `max_inline_size` bytes.
    pub fn new(
        inner: P,
        store: Arc<dyn Store>,
        max_inline_size: usize,
    ) -> Result<Self, OffloadConfigError> {
        Self::with_config(inner, store, OffloadConfig::new(max_inline_size))
    }

    pub fn with_config(
        inner: P,
        store: Arc<dyn Store>,
        config: OffloadConfig,
    ) -> Result<Self, OffloadConfigError> {
        config.validate()?;
        Ok(Self {
            inner,
            store,
            config,
        })
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn config(&self) -> &OffloadConfig {
        &self.config
    }

    /// Writes the content of `message` to the blob store if it is too large
    /// and returns the message to send plus the key written, if any.
    async fn offload(
        &self,
        message: QueueMessage,
        cancel: &CancellationToken,
    ) -> MessagingResult<(QueueMessage, Option<String>)> {
        let len = message.content.len();
        if len <= self.config.max_inline_size {
            return Ok((message, None));
        }

        let key = self.config.new_blob_key();
        debug!(key = %key, len, "offloading large message content");

        let QueueMessage {
            id,
            content,
            mut properties,
            dequeue_count,
        } = message;

        cancellable(cancel, async {
            self.store
                .put_bytes(&key, content)
                .await
                .map_err(|source| MessagingError::OffloadWrite {
                    key: key.clone(),
                    source,
                })
        })
        .await?;

        properties.insert(LARGE_MESSAGE_CONTENT_HEADER.to_string(), key.clone());
        properties.insert(LARGE_MESSAGE_LENGTH_HEADER.to_string(), len.to_string());
        let pointer = QueueMessage {
            id,
            content: Bytes::new(),
            properties,
            dequeue_count,
        };
        Ok((pointer, Some(key)))
    }

    async fn discard_blobs(&self, keys: &[String]) {
        if !self.config.cleanup_on_publish_failure {
            if !keys.is_empty() {
                debug!(count = keys.len(), "leaving orphaned offload blobs behind");
            }
            return;
        }
        for key in keys {
            if let Err(err) = self.store.delete(key).await {
                warn!("offload: failed to delete orphaned blob {key}: {err}");
            }
        }
    }
}

#[async_trait]
impl<P: MessagePublisher> MessagePublisher for LargeMessageOffloader<P> {
    async fn put_messages(
        &self,
        messages: Vec<QueueMessage>,
        cancel: &CancellationToken,
    ) -> MessagingResult<()> {
        if cancel.is_cancelled() {
            return Err(MessagingError::Cancelled);
        }
        for message in &messages {
            if let Some(reserved) = message.reserved_property() {
                return Err(MessagingError::ReservedProperty(reserved));
            }
        }

        let results = join_all(messages.into_iter().map(|m| self.offload(m, cancel))).await;

        let mut outgoing = Vec::with_capacity(results.len());
        let mut written = Vec::new();
        let mut first_err = None;
        for result in results {
            match result {
                Ok((message, key)) => {
                    written.extend(key);
                    outgoing.push(message);
                }
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }

        if let Some(err) = first_err {
            self.discard_blobs(&written).await;
            return Err(err);
        }
        if cancel.is_cancelled() {
            self.discard_blobs(&written).await;
            return Err(MessagingError::Cancelled);
        }

        trace!(
            count = outgoing.len(),
            offloaded = written.len(),
            "forwarding batch"
        );
        if let Err(err) = self.inner.put_messages(outgoing, cancel).await {
            self.discard_blobs(&written).await;
            return Err(err);
        }
        Ok(())
    }
}

/// Counts of a [`LargeMessageRehydrator::deliver`] run.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    /// Messages handed to the processor successfully.
    pub delivered: usize,
    /// Per-message failures, in receive order.
    pub failed: Vec<MessagingError>,
}

impl DeliveryReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn received(&self) -> usize {
        self.delivered + self.failed.len()
    }
}

/// Receiver decorator that restores content offloaded by
/// [`LargeMessageOffloader`].
#[derive(Debug, Clone)]
pub struct LargeMessageRehydrator<R> {
    inner: R,
    store: Arc<dyn Store>,
    config: OffloadConfig,
}

impl<R: MessageReceiver> LargeMessageRehydrator<R> {
    pub fn new(inner: R, store: Arc<dyn Store>) -> Self {
        Self {
            inner,
            store,
            config: OffloadConfig::default(),
        }
    }

    pub fn with_config(
        inner: R,
        store: Arc<dyn Store>,
        config: OffloadConfig,
    ) -> Result<Self, OffloadConfigError> {
        config.validate()?;
        Ok(Self {
            inner,
            store,
            config,
        })
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Restores a single message. Messages without the pointer property
    /// are returned as they are.
    pub async fn rehydrate(
        &self,
        message: QueueMessage,
        cancel: &CancellationToken,
    ) -> MessagingResult<QueueMessage> {
        self.rehydrate_keyed(message, cancel)
            .await
            .map(|(message, _)| message)
    }

    async fn rehydrate_keyed(
        &self,
        message: QueueMessage,
        cancel: &CancellationToken,
    ) -> MessagingResult<(QueueMessage, Option<String>)> {
        let Some(key) = message.large_content_key().map(str::to_string) else {
            return Ok((message, None));
        };
        let expected = message
            .property(LARGE_MESSAGE_LENGTH_HEADER)
            .and_then(|len| len.parse::<u64>().ok());

        let content = cancellable(cancel, async {
            self.store
                .open_read_bytes(&key, 0, None)
                .await
                .map_err(|source| MessagingError::OffloadRead {
                    key: key.clone(),
                    source,
                })
        })
        .await?;

        if let Some(expected) = expected {
            let actual = content.len() as u64;
            if actual != expected {
                return Err(MessagingError::ContentLengthMismatch {
                    key,
                    expected,
                    actual,
                });
            }
        }
        trace!(key = %key, len = content.len(), "rehydrated message content");

        let QueueMessage {
            id,
            mut properties,
            dequeue_count,
            ..
        } = message;
        properties.remove(LARGE_MESSAGE_CONTENT_HEADER);
        properties.remove(LARGE_MESSAGE_LENGTH_HEADER);
        let restored = QueueMessage {
            id,
            content,
            properties,
            dequeue_count,
        };
        Ok((restored, Some(key)))
    }

    async fn receive_keyed(
        &self,
        max_batch_size: usize,
        cancel: &CancellationToken,
    ) -> MessagingResult<Vec<MessagingResult<(QueueMessage, Option<String>)>>> {
        let received = self.inner.receive_messages(max_batch_size, cancel).await?;
        // join_all keeps input order regardless of completion order
        Ok(join_all(received.into_iter().map(|m| self.rehydrate_keyed(m, cancel))).await)
    }

    /// Receives a batch and rehydrates each message independently.
    ///
    /// The outer error is a failure of the inner receiver. A message whose
    /// content cannot be fetched yields an error in its own slot and does
    /// not affect the rest of the batch. Order matches receive order.
    pub async fn receive_batch(
        &self,
        max_batch_size: usize,
        cancel: &CancellationToken,
    ) -> MessagingResult<Vec<MessagingResult<QueueMessage>>> {
        let batch = self.receive_keyed(max_batch_size, cancel).await?;
        Ok(batch
            .into_iter()
            .map(|item| item.map(|(message, _)| message))
            .collect())
    }

    /// Receives a batch and hands every restored message to `processor`
    /// in receive order.
    ///
    /// Messages that fail to rehydrate, or that the processor rejects, are
    /// recorded in the report; the remaining messages are still delivered.
    pub async fn deliver<H>(
        &self,
        max_batch_size: usize,
        cancel: &CancellationToken,
        processor: &H,
    ) -> MessagingResult<DeliveryReport>
    where
        H: MessageProcessor + ?Sized,
    {
        let batch = self.receive_keyed(max_batch_size, cancel).await?;
        let mut report = DeliveryReport::default();

        for item in batch {
            let (message, key) = match item {
                Ok(ok) => ok,
                Err(err) => {
                    warn!("rehydrate: skipping message: {err}");
                    report.failed.push(err);
                    continue;
                }
            };

            if let Err(err) = processor.process(message).await {
                report.failed.push(MessagingError::Processor(err));
                continue;
            }
            report.delivered += 1;

            if let Some(key) = key.filter(|_| self.config.delete_after_rehydrate) {
                if let Err(err) = self.store.delete(&key).await {
                    warn!("rehydrate: failed to delete delivered blob {key}: {err}");
                }
            }
        }

        Ok(report)
    }
}

#[async_trait]
impl<R: MessageReceiver> MessageReceiver for LargeMessageRehydrator<R> {
    /// Returns every message that rehydrated successfully, in receive order.
    ///
    /// Messages whose content cannot be restored are dropped from the result
    /// and logged with their blob key; they do not affect the rest of the
    /// batch. The call only fails when nothing in a non-empty batch could be
    /// restored. Use [`LargeMessageRehydrator::receive_batch`] to see every
    /// per-message failure.
    async fn receive_messages(
        &self,
        max_batch_size: usize,
        cancel: &CancellationToken,
    ) -> MessagingResult<Vec<QueueMessage>> {
        let batch = self.receive_batch(max_batch_size, cancel).await?;
        let mut restored = Vec::with_capacity(batch.len());
        let mut first_err = None;
        for item in batch {
            match item {
                Ok(message) => restored.push(message),
                Err(err) => {
                    warn!(
                        key = err.blob_key().unwrap_or_default(),
                        "rehydrate: dropping message: {err}"
                    );
                    first_err.get_or_insert(err);
                }
            }
        }
        match first_err {
            Some(err) if restored.is_empty() => Err(err),
            _ => Ok(restored),
        }
    }
}

/// Wrapping helpers for publishers and receivers.
pub trait MessagingExt: Sized {
    fn offload_large_messages(
        self,
        store: Arc<dyn Store>,
        max_inline_size: usize,
    ) -> Result<LargeMessageOffloader<Self>, OffloadConfigError>
    where
        Self: MessagePublisher,
    {
        LargeMessageOffloader::new(self, store, max_inline_size)
    }

    fn rehydrate_large_messages(self, store: Arc<dyn Store>) -> LargeMessageRehydrator<Self>
    where
        Self: MessageReceiver,
    {
        LargeMessageRehydrator::new(self, store)
    }
}

impl<T> MessagingExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_threshold_is_rejected() {
        assert_eq!(
            OffloadConfig::new(0).validate(),
            Err(OffloadConfigError::ZeroThreshold)
        );
        assert!(OffloadConfig::new(1).validate().is_ok());
    }

    #[test]
    fn key_prefix_must_be_relative() {
        let mut config = OffloadConfig::new(10);
        config.key_prefix = "/abs".into();
        assert!(matches!(
            config.validate(),
            Err(OffloadConfigError::InvalidKeyPrefix(_))
        ));
        config.key_prefix = "a/../b".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn blob_keys_are_unique_and_prefixed() {
        let config = OffloadConfig {
            key_prefix: "big/".into(),
            ..OffloadConfig::new(10)
        };
        let a = config.new_blob_key();
        let b = config.new_blob_key();
        assert_ne!(a, b);
        assert!(a.starts_with("big/"));
        assert!(!a.starts_with("big//"));

        let bare = OffloadConfig {
            key_prefix: String::new(),
            ..OffloadConfig::new(10)
        };
        assert!(!bare.new_blob_key().contains('/'));
    }

    #[test]
    fn config_from_connection_string() {
        let cs = StorageConnectionString::parse(
            "offload://maxInlineSize=1024;keyPrefix=spill;deleteAfterRehydrate=true",
        )
        .unwrap();
        let config = OffloadConfig::from_connection_string(&cs).unwrap();
        assert_eq!(config.max_inline_size, 1024);
        assert_eq!(config.key_prefix, "spill");
        assert!(config.delete_after_rehydrate);
        assert!(!config.cleanup_on_publish_failure);

        let cs = StorageConnectionString::parse("offload://maxInlineSize=0").unwrap();
        assert!(matches!(
            OffloadConfig::from_connection_string(&cs),
            Err(ResolveError::InvalidParameter { key, .. }) if key == "maxInlineSize"
        ));
    }
}
