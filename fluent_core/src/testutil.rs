//! Test utilities for `Store` and messaging implementations.
//!
//! [`StoreTests`] is a conformance suite that can be run against any
//! `Store` implementation. The remaining types are small doubles for
//! exercising decorators and factories without a real backend.
//!
//! # Usage
//!
//! In your backend crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! fluent_core = { workspace = true, features = ["testutil"] }
//! ```
//!
//! In your test file:
//!
//! ```ignore
//! use fluent_core::testutil::StoreTests;
//!
//! #[tokio::test]
//! async fn test_my_store() {
//!     let store = MyStore::new(...);
//!     StoreTests::new(&store).run_all().await.unwrap();
//! }
//! ```

use std::{
    collections::{HashSet, VecDeque},
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::{
    messaging::{MessagePublisher, MessageReceiver, MessagingError, MessagingResult, QueueMessage},
    store::{ByteStream, PathStream, PutResponse, Store, StoreError, StoreFeatures, StoreResult},
};

/// Test suite for `Store` implementations.
///
/// Runs a set of tests to verify that a store implementation behaves
/// according to the `Store` trait contract.
pub struct StoreTests<'a, S> {
    store: &'a S,
    /// Prefix for test files to avoid conflicts
    prefix: String,
}

impl<'a, S: Store> StoreTests<'a, S> {
    /// Create a new test suite for the given store.
    pub fn new(store: &'a S) -> Self {
        let prefix = format!("_test_{}/", rand::rng().random::<u32>());
        Self { store, prefix }
    }

    /// Create a new test suite with a custom prefix.
    pub fn with_prefix(store: &'a S, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn path(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Run all tests.
    pub async fn run_all(&self) -> StoreResult<()> {
        self.test_put_get_bytes().await?;
        self.test_put_get_stream().await?;
        self.test_exists().await?;
        self.test_size().await?;
        self.test_missing().await?;
        self.test_delete().await?;
        self.test_list().await?;
        self.test_partial_read().await?;
        self.test_overwrite().await?;

        if self.store.features().supports_rename {
            self.test_rename().await?;
        }

        self.cleanup().await?;

        Ok(())
    }

    /// Test basic put and get with bytes.
    pub async fn test_put_get_bytes(&self) -> StoreResult<()> {
        let path = self.path("bytes_test.bin");
        let data = Bytes::from_static(b"hello, world!");

        self.store.put_bytes(&path, data.clone()).await?;

        let retrieved = self.store.open_read_bytes(&path, 0, None).await?;
        assert_eq!(retrieved, data, "retrieved data should match original");

        Ok(())
    }

    /// Test put and get with streams.
    pub async fn test_put_get_stream(&self) -> StoreResult<()> {
        let path = self.path("stream_test.bin");
        let data = random_bytes(1024 * 10);

        let stream = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(data.slice(..4096)),
            Ok(data.slice(4096..)),
        ]);
        self.store.put_stream(&path, Box::new(stream)).await?;

        let mut stream = self.store.open_read_stream(&path, 0, None).await?;
        let mut retrieved = Vec::new();
        while let Some(chunk) = stream.next().await {
            retrieved.extend_from_slice(&chunk?);
        }

        assert_eq!(retrieved.len(), data.len(), "stream data length should match");
        assert_eq!(retrieved, data.as_ref(), "stream data should match");

        Ok(())
    }

    /// Test exists check.
    pub async fn test_exists(&self) -> StoreResult<()> {
        let path = self.path("exists_test.bin");

        assert!(
            !self.store.exists(&path).await?,
            "file should not exist before creation"
        );

        self.store
            .put_bytes(&path, Bytes::from_static(b"test"))
            .await?;

        assert!(
            self.store.exists(&path).await?,
            "file should exist after creation"
        );

        Ok(())
    }

    /// Test size retrieval.
    pub async fn test_size(&self) -> StoreResult<()> {
        let path = self.path("size_test.bin");
        let data = Bytes::from(vec![42u8; 12345]);

        self.store.put_bytes(&path, data).await?;

        let size = self.store.size(&path).await?;
        assert_eq!(size, 12345, "size should match data length");

        Ok(())
    }

    /// Reading a path that was never written reports `NotFound`.
    pub async fn test_missing(&self) -> StoreResult<()> {
        let path = self.path("never_written.bin");

        let err = self
            .store
            .open_read_bytes(&path, 0, None)
            .await
            .expect_err("reading a missing path should fail");
        assert!(
            StoreError::is_not_found(&err),
            "missing path should report not found, got: {err:#}"
        );

        Ok(())
    }

    /// Test file deletion.
    pub async fn test_delete(&self) -> StoreResult<()> {
        let path = self.path("delete_test.bin");

        self.store
            .put_bytes(&path, Bytes::from_static(b"to be deleted"))
            .await?;

        assert!(
            self.store.exists(&path).await?,
            "file should exist before delete"
        );

        self.store.delete(&path).await?;

        assert!(
            !self.store.exists(&path).await?,
            "file should not exist after delete"
        );

        Ok(())
    }

    /// Test file listing.
    pub async fn test_list(&self) -> StoreResult<()> {
        let files = ["list_a.bin", "list_b.bin", "subdir/list_c.bin"];

        for file in &files {
            let path = self.path(file);
            self.store
                .put_bytes(&path, Bytes::from_static(b"list test"))
                .await?;
        }

        let mut stream = self.store.list().await?;
        let mut found: HashSet<String> = HashSet::new();

        while let Some(result) = stream.next().await {
            let path = result?;
            if path.starts_with(&self.prefix) {
                found.insert(path);
            }
        }

        for file in &files {
            let path = self.path(file);
            assert!(found.contains(&path), "list should contain {}", path);
        }

        Ok(())
    }

    /// Test partial/range reads.
    pub async fn test_partial_read(&self) -> StoreResult<()> {
        let path = self.path("partial_test.bin");
        let data = Bytes::from_static(b"0123456789abcdef");

        self.store.put_bytes(&path, data).await?;

        let partial = self.store.open_read_bytes(&path, 5, None).await?;
        assert_eq!(partial.as_ref(), b"56789abcdef", "offset read should work");

        let partial = self.store.open_read_bytes(&path, 0, Some(5)).await?;
        assert_eq!(partial.as_ref(), b"01234", "length-limited read should work");

        let partial = self.store.open_read_bytes(&path, 4, Some(4)).await?;
        assert_eq!(partial.as_ref(), b"4567", "offset + length read should work");

        Ok(())
    }

    /// Test overwriting existing files.
    pub async fn test_overwrite(&self) -> StoreResult<()> {
        let path = self.path("overwrite_test.bin");

        self.store
            .put_bytes(&path, Bytes::from_static(b"original content"))
            .await?;

        self.store
            .put_bytes(&path, Bytes::from_static(b"new content"))
            .await?;

        let retrieved = self.store.open_read_bytes(&path, 0, None).await?;
        assert_eq!(
            retrieved.as_ref(),
            b"new content",
            "overwritten content should be new"
        );

        Ok(())
    }

    /// Test rename (only run if supported).
    pub async fn test_rename(&self) -> StoreResult<()> {
        let old_path = self.path("rename_old.bin");
        let new_path = self.path("rename_new.bin");

        self.store
            .put_bytes(&old_path, Bytes::from_static(b"rename me"))
            .await?;

        self.store.rename(&old_path, &new_path).await?;

        assert!(
            !self.store.exists(&old_path).await?,
            "old path should not exist after rename"
        );
        assert!(
            self.store.exists(&new_path).await?,
            "new path should exist after rename"
        );

        let content = self.store.open_read_bytes(&new_path, 0, None).await?;
        assert_eq!(
            content.as_ref(),
            b"rename me",
            "content should be preserved after rename"
        );

        Ok(())
    }

    /// Clean up test files.
    pub async fn cleanup(&self) -> StoreResult<()> {
        let mut stream = self.store.list().await?;
        let mut paths = Vec::new();

        while let Some(result) = stream.next().await {
            let path = result?;
            if path.starts_with(&self.prefix) {
                paths.push(path);
            }
        }
        for path in paths {
            let _ = self.store.delete(&path).await;
        }

        Ok(())
    }
}

/// Generate random bytes for testing.
pub fn random_bytes(len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    rand::rng().fill(&mut data[..]);
    Bytes::from(data)
}

/// Assert that two byte slices are equal with a descriptive message.
#[macro_export]
macro_rules! assert_bytes_eq {
    ($left:expr, $right:expr) => {
        assert_eq!(
            $left.as_ref() as &[u8],
            $right.as_ref() as &[u8],
            "byte content mismatch"
        );
    };
    ($left:expr, $right:expr, $($arg:tt)+) => {
        assert_eq!(
            $left.as_ref() as &[u8],
            $right.as_ref() as &[u8],
            $($arg)+
        );
    };
}

// ============================================================================
// Store doubles
// ============================================================================

/// A store that discards writes and never finds anything.
///
/// The name shows up in its `Debug` output, which makes it handy for
/// telling resolved instances apart.
#[derive(Debug, Default)]
pub struct NullStore {
    pub name: &'static str,
}

impl NullStore {
    pub fn named(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl Store for NullStore {
    async fn put_stream(&self, _path: &str, _stream: ByteStream) -> StoreResult<PutResponse> {
        Ok(())
    }

    fn features(&self) -> StoreFeatures {
        StoreFeatures {
            supports_rename: false,
            case_sensitive: true,
        }
    }

    async fn exists(&self, _path: &str) -> StoreResult<bool> {
        Ok(false)
    }

    async fn put_bytes(&self, _path: &str, _bytes: Bytes) -> StoreResult<PutResponse> {
        Ok(())
    }

    async fn open_read_stream(
        &self,
        _path: &str,
        _offset: u64,
        _max_len: Option<u64>,
    ) -> StoreResult<ByteStream> {
        Err(StoreError::NotFound.into())
    }

    async fn open_read_bytes(
        &self,
        _path: &str,
        _offset: u64,
        _max_len: Option<u64>,
    ) -> StoreResult<Bytes> {
        Err(StoreError::NotFound.into())
    }

    async fn size(&self, _path: &str) -> StoreResult<u64> {
        Err(StoreError::NotFound.into())
    }

    async fn list(&self) -> StoreResult<PathStream> {
        Ok(Box::new(futures::stream::empty()))
    }

    async fn delete(&self, _path: &str) -> StoreResult<()> {
        Ok(())
    }

    async fn rename(&self, _old_path: &str, _new_path: &str) -> StoreResult<()> {
        Err(anyhow!("rename is not supported"))
    }
}

/// Wraps a store, counts calls and can be told to fail writes or reads.
#[derive(Debug)]
pub struct InstrumentedStore<S> {
    inner: S,
    puts: AtomicUsize,
    reads: AtomicUsize,
    deletes: AtomicUsize,
    fail_puts: AtomicBool,
    fail_reads: AtomicBool,
}

impl<S: Store> InstrumentedStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            puts: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            fail_puts: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl<S: Store> Store for InstrumentedStore<S> {
    async fn put_stream(&self, path: &str, stream: ByteStream) -> StoreResult<PutResponse> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(anyhow!("injected write failure for {path}"));
        }
        self.inner.put_stream(path, stream).await
    }

    fn features(&self) -> StoreFeatures {
        self.inner.features()
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        self.inner.exists(path).await
    }

    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<PutResponse> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(anyhow!("injected write failure for {path}"));
        }
        self.inner.put_bytes(path, bytes).await
    }

    async fn open_read_stream(
        &self,
        path: &str,
        offset: u64,
        max_len: Option<u64>,
    ) -> StoreResult<ByteStream> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(anyhow!("injected read failure for {path}"));
        }
        self.inner.open_read_stream(path, offset, max_len).await
    }

    async fn open_read_bytes(
        &self,
        path: &str,
        offset: u64,
        max_len: Option<u64>,
    ) -> StoreResult<Bytes> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(anyhow!("injected read failure for {path}"));
        }
        self.inner.open_read_bytes(path, offset, max_len).await
    }

    async fn size(&self, path: &str) -> StoreResult<u64> {
        self.inner.size(path).await
    }

    async fn list(&self) -> StoreResult<PathStream> {
        self.inner.list().await
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(path).await
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> StoreResult<()> {
        self.inner.rename(old_path, new_path).await
    }
}

// ============================================================================
// Messaging doubles
// ============================================================================

/// Publisher that records every batch it is given.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    batches: Mutex<Vec<Vec<QueueMessage>>>,
    fail: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent publishes fail with a transport error.
    pub fn fail_publishes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<Vec<QueueMessage>> {
        self.batches.lock().unwrap().clone()
    }

    /// All published messages, flattened in publish order.
    pub fn messages(&self) -> Vec<QueueMessage> {
        self.batches().into_iter().flatten().collect()
    }
}

#[async_trait]
impl MessagePublisher for RecordingPublisher {
    async fn put_messages(
        &self,
        messages: Vec<QueueMessage>,
        cancel: &CancellationToken,
    ) -> MessagingResult<()> {
        if cancel.is_cancelled() {
            return Err(MessagingError::Cancelled);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(MessagingError::Transport(anyhow!("injected publish failure")));
        }
        self.batches.lock().unwrap().push(messages);
        Ok(())
    }
}

/// Receiver that hands out pre-loaded messages in order.
#[derive(Debug, Default)]
pub struct ScriptedReceiver {
    queue: Mutex<VecDeque<QueueMessage>>,
    fail: AtomicBool,
}

impl ScriptedReceiver {
    pub fn new(messages: impl IntoIterator<Item = QueueMessage>) -> Self {
        Self {
            queue: Mutex::new(messages.into_iter().collect()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn push(&self, message: QueueMessage) {
        self.queue.lock().unwrap().push_back(message);
    }

    /// Makes subsequent receives fail with a transport error.
    pub fn fail_receives(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageReceiver for ScriptedReceiver {
    async fn receive_messages(
        &self,
        max_batch_size: usize,
        cancel: &CancellationToken,
    ) -> MessagingResult<Vec<QueueMessage>> {
        if cancel.is_cancelled() {
            return Err(MessagingError::Cancelled);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(MessagingError::Transport(anyhow!("injected receive failure")));
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
