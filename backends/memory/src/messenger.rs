use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::anyhow;
use async_trait::async_trait;
use fluent_core::{
    CancellationToken,
    messaging::{MessagePublisher, MessageReceiver, MessagingError, MessagingResult, QueueMessage},
};

/// A single in-process FIFO queue.
///
/// An optional per-message size limit makes it behave like a real
/// transport with a payload cap, which is what the large-message
/// decorators exist for.
#[derive(Debug, Default)]
pub struct MemoryMessenger {
    queue: Mutex<VecDeque<QueueMessage>>,
    max_message_size: Option<usize>,
    next_id: AtomicU64,
}

impl MemoryMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects any message whose content is longer than `max` bytes.
    pub fn with_max_message_size(max: usize) -> Self {
        Self {
            max_message_size: Some(max),
            ..Self::default()
        }
    }

    pub fn max_message_size(&self) -> Option<usize> {
        self.max_message_size
    }

    /// Messages waiting to be received.
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MessagePublisher for MemoryMessenger {
    /// Enqueues the whole batch or nothing.
    async fn put_messages(
        &self,
        messages: Vec<QueueMessage>,
        cancel: &CancellationToken,
    ) -> MessagingResult<()> {
        if cancel.is_cancelled() {
            return Err(MessagingError::Cancelled);
        }
        if let Some(max) = self.max_message_size {
            if let Some(too_big) = messages.iter().find(|m| m.content.len() > max) {
                return Err(MessagingError::Transport(anyhow!(
                    "message of {} bytes exceeds the {max} byte limit",
                    too_big.content.len()
                )));
            }
        }

        let mut queue = self.queue.lock().unwrap();
        for mut message in messages {
            if message.id.is_none() {
                let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
                message.id = Some(format!("mem-{seq}"));
            }
            queue.push_back(message);
        }
        Ok(())
    }
}

#[async_trait]
impl MessageReceiver for MemoryMessenger {
    async fn receive_messages(
        &self,
        max_batch_size: usize,
        cancel: &CancellationToken,
    ) -> MessagingResult<Vec<QueueMessage>> {
        if cancel.is_cancelled() {
            return Err(MessagingError::Cancelled);
        }
        let mut queue = self.queue.lock().unwrap();
        let take = max_batch_size.min(queue.len());
        Ok(queue
            .drain(..take)
            .map(|mut message| {
                message.dequeue_count += 1;
                message
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_with_ids_and_dequeue_count() {
        let messenger = MemoryMessenger::new();
        let cancel = CancellationToken::new();

        messenger
            .put_messages(
                vec![
                    QueueMessage::new(&b"one"[..]),
                    QueueMessage::new(&b"two"[..]).with_id("custom"),
                    QueueMessage::new(&b"three"[..]),
                ],
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(messenger.len(), 3);

        let first = messenger.receive_messages(2, &cancel).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].content.as_ref(), b"one");
        assert_eq!(first[0].id.as_deref(), Some("mem-0"));
        assert_eq!(first[1].id.as_deref(), Some("custom"));
        assert!(first.iter().all(|m| m.dequeue_count == 1));

        let rest = messenger.receive_messages(10, &cancel).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id.as_deref(), Some("mem-1"));
        assert!(messenger.receive_messages(10, &cancel).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn size_limit_rejects_the_whole_batch() {
        let messenger = MemoryMessenger::with_max_message_size(4);
        let cancel = CancellationToken::new();

        let result = messenger
            .put_messages(
                vec![QueueMessage::new(&b"ok"[..]), QueueMessage::new(&b"too long"[..])],
                &cancel,
            )
            .await;
        assert!(matches!(result, Err(MessagingError::Transport(_))));
        assert!(messenger.is_empty());
    }

    #[tokio::test]
    async fn cancelled_calls_do_nothing() {
        let messenger = MemoryMessenger::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = messenger
            .put_messages(vec![QueueMessage::new(&b"x"[..])], &cancel)
            .await;
        assert!(matches!(result, Err(MessagingError::Cancelled)));
        assert!(messenger.is_empty());
    }
}
