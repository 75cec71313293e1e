use std::sync::Arc;

use bytes::Bytes;
use fluent_core::messaging::{LargeMessageOffloader, LargeMessageRehydrator};
use fluent_core::testutil::{RecordingPublisher, ScriptedReceiver, random_bytes};
use fluent_core::{
    CancellationToken, KeyValueStore, MessagePublisher, MessageReceiver, QueueMessage,
    ResolveError, StorageConnectionString, StorageFactory, Store,
};
use fluent_store_local::DiskModule;

fn factory() -> StorageFactory {
    StorageFactory::new().with_module(DiskModule)
}

#[tokio::test]
async fn resolves_store_rooted_at_path() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cs = StorageConnectionString::new("disk").with_parameter("path", dir.path().to_string_lossy())?;

    let store = factory().resolve_store_from(&cs).await?;
    store.put_bytes("nested/file.bin", Bytes::from_static(b"on disk")).await?;

    let written = tokio::fs::read(dir.path().join("nested").join("file.bin")).await?;
    assert_eq!(written, b"on disk");
    Ok(())
}

#[tokio::test]
async fn missing_path_is_critical() {
    let err = factory().resolve_store("disk://").await.unwrap_err();
    assert!(matches!(
        err,
        ResolveError::MissingParameter { ref key, critical: true } if key == "path"
    ));
    assert!(err.halts_dispatch());
}

#[tokio::test]
async fn key_value_survives_reopening() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cs = StorageConnectionString::new("disk")
        .with_parameter("path", dir.path().to_string_lossy())?
        .with_parameter("kvPrefix", "settings")?;

    let first = factory().resolve_key_value_from(&cs).await?;
    first.put("theme", Bytes::from_static(b"dark")).await?;
    drop(first);

    let second = factory().resolve_key_value_from(&cs).await?;
    assert_eq!(second.get("theme").await?, Some(Bytes::from_static(b"dark")));
    assert_eq!(second.keys().await?, vec!["theme".to_string()]);
    assert!(dir.path().join("settings").is_dir());
    Ok(())
}

#[tokio::test]
async fn messenger_is_not_offered() {
    let err = factory().resolve_messenger("disk://path=/tmp").await.unwrap_err();
    assert!(matches!(err, ResolveError::UnrecognizedPrefix { .. }));
}

#[tokio::test]
async fn offloads_into_a_directory() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store: Arc<dyn Store> = Arc::new(fluent_store_local::LocalStore::new(dir.path()));
    let published = Arc::new(RecordingPublisher::new());
    let offloader = LargeMessageOffloader::new(published.clone(), store.clone(), 1024)?;
    let cancel = CancellationToken::new();

    let payload = random_bytes(10_000);
    offloader
        .put_messages(vec![QueueMessage::new(payload.clone())], &cancel)
        .await?;

    let receiver = ScriptedReceiver::new(published.messages());
    let rehydrator = LargeMessageRehydrator::new(receiver, store);
    let received = rehydrator.receive_messages(1, &cancel).await?;
    assert_eq!(received[0].content, payload);
    Ok(())
}
