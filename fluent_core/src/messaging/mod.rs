//! Backend-neutral queue messaging.
//!
//! A [`Messenger`] is anything that can both publish and receive
//! [`QueueMessage`]s. Transports implement [`MessagePublisher`] and
//! [`MessageReceiver`]; the decorators in [`offload`] layer on top of any
//! of them.

pub mod offload;

use std::{collections::BTreeMap, fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

pub use offload::{
    DeliveryReport, LargeMessageOffloader, LargeMessageRehydrator, MessagingExt, OffloadConfig,
    OffloadConfigError,
};

/// Property holding the blob key of offloaded message content.
///
/// Reserved: only the large-message decorators set or remove it.
pub const LARGE_MESSAGE_CONTENT_HEADER: &str = "x-fluent-large-content";

/// Property holding the byte length of offloaded message content.
///
/// Reserved like [`LARGE_MESSAGE_CONTENT_HEADER`].
pub const LARGE_MESSAGE_LENGTH_HEADER: &str = "x-fluent-large-content-length";

pub type MessagingResult<T> = Result<T, MessagingError>;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum MessagingError {
    #[error("failed to write offloaded message content to blob '{key}'")]
    OffloadWrite {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to read offloaded message content from blob '{key}'")]
    OffloadRead {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("offloaded blob '{key}' holds {actual} bytes but the message announced {expected}")]
    ContentLengthMismatch {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("message property '{0}' is reserved for large message handling")]
    ReservedProperty(&'static str),

    #[error("message transport failed")]
    Transport(#[source] anyhow::Error),

    #[error("message processor failed")]
    Processor(#[source] anyhow::Error),

    #[error("operation was cancelled")]
    Cancelled,
}

impl MessagingError {
    /// The blob key involved in an offload failure, if any.
    pub fn blob_key(&self) -> Option<&str> {
        match self {
            MessagingError::OffloadWrite { key, .. }
            | MessagingError::OffloadRead { key, .. }
            | MessagingError::ContentLengthMismatch { key, .. } => Some(key),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: Option<String>,
    pub content: Bytes,
    pub properties: BTreeMap<String, String>,
    pub dequeue_count: u32,
}

impl QueueMessage {
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Blob key of offloaded content, if this message carries a pointer
    /// instead of its payload.
    pub fn large_content_key(&self) -> Option<&str> {
        self.property(LARGE_MESSAGE_CONTENT_HEADER)
    }

    /// The first reserved large-message property set on this message.
    pub fn reserved_property(&self) -> Option<&'static str> {
        [LARGE_MESSAGE_CONTENT_HEADER, LARGE_MESSAGE_LENGTH_HEADER]
            .into_iter()
            .find(|key| self.properties.contains_key(*key))
    }
}

#[async_trait]
pub trait MessagePublisher: fmt::Debug + Send + Sync {
    /// Publishes a batch of messages.
    ///
    /// Implementations should stop early if `cancel` fires, but must not
    /// leave a batch half-published when they can avoid it.
    async fn put_messages(
        &self,
        messages: Vec<QueueMessage>,
        cancel: &CancellationToken,
    ) -> MessagingResult<()>;
}

#[async_trait]
pub trait MessageReceiver: fmt::Debug + Send + Sync {
    /// Receives up to `max_batch_size` messages, possibly none.
    async fn receive_messages(
        &self,
        max_batch_size: usize,
        cancel: &CancellationToken,
    ) -> MessagingResult<Vec<QueueMessage>>;
}

/// A transport that can both publish and receive.
pub trait Messenger: MessagePublisher + MessageReceiver {}

impl<T: MessagePublisher + MessageReceiver + ?Sized> Messenger for T {}

/// Application code that handles delivered messages.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, message: QueueMessage) -> anyhow::Result<()>;
}

#[async_trait]
impl<T: MessagePublisher + ?Sized> MessagePublisher for Arc<T> {
    async fn put_messages(
        &self,
        messages: Vec<QueueMessage>,
        cancel: &CancellationToken,
    ) -> MessagingResult<()> {
        (**self).put_messages(messages, cancel).await
    }
}

#[async_trait]
impl<T: MessageReceiver + ?Sized> MessageReceiver for Arc<T> {
    async fn receive_messages(
        &self,
        max_batch_size: usize,
        cancel: &CancellationToken,
    ) -> MessagingResult<Vec<QueueMessage>> {
        (**self).receive_messages(max_batch_size, cancel).await
    }
}

/// Runs `fut` unless `cancel` fires first. Already cancelled tokens never
/// poll `fut`.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> MessagingResult<T>
where
    F: Future<Output = MessagingResult<T>>,
{
    if cancel.is_cancelled() {
        return Err(MessagingError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(MessagingError::Cancelled),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let msg = QueueMessage::new(&b"payload"[..])
            .with_id("m-1")
            .with_property("kind", "order");
        assert_eq!(msg.id.as_deref(), Some("m-1"));
        assert_eq!(msg.content.as_ref(), b"payload");
        assert_eq!(msg.property("kind"), Some("order"));
        assert_eq!(msg.large_content_key(), None);
        assert_eq!(msg.reserved_property(), None);
        assert_eq!(msg.dequeue_count, 0);
    }

    #[test]
    fn both_large_message_properties_are_reserved() {
        let msg = QueueMessage::default().with_property(LARGE_MESSAGE_LENGTH_HEADER, "app-value");
        assert_eq!(msg.reserved_property(), Some(LARGE_MESSAGE_LENGTH_HEADER));

        let msg = msg.with_property(LARGE_MESSAGE_CONTENT_HEADER, "k");
        assert_eq!(msg.reserved_property(), Some(LARGE_MESSAGE_CONTENT_HEADER));
    }

    #[test]
    fn blob_key_is_reported_for_offload_errors() {
        let err = MessagingError::OffloadRead {
            key: "large-messages/abc".into(),
            source: anyhow::anyhow!("gone"),
        };
        assert_eq!(err.blob_key(), Some("large-messages/abc"));
        assert_eq!(MessagingError::Cancelled.blob_key(), None);
    }

    #[tokio::test]
    async fn cancelled_token_skips_future() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let polled = std::sync::atomic::AtomicBool::new(false);
        let result = cancellable(&cancel, async {
            polled.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(MessagingError::Cancelled)));
        assert!(!polled.load(std::sync::atomic::Ordering::SeqCst));
    }
}
