use std::sync::Arc;

use bytes::Bytes;
use fluent_core::{
    CancellationToken, KeyValueStore, MessagePublisher, MessageReceiver, QueueMessage,
    ResolveError, StorageFactory, Store, StoreKeyValue,
};
use fluent_store_memory::{InMemoryModule, MemoryStore};

fn factory() -> StorageFactory {
    StorageFactory::new().with_module(InMemoryModule)
}

#[tokio::test]
async fn resolves_every_kind() -> anyhow::Result<()> {
    let factory = factory();

    let store = factory.resolve_store("inmemory://").await?;
    store.put_bytes("a/b", Bytes::from_static(b"hello")).await?;
    assert_eq!(store.open_read_bytes("a/b", 0, None).await?.as_ref(), b"hello");

    let kv = factory.resolve_key_value("InMemory://").await?;
    kv.put("k", Bytes::from_static(b"v")).await?;
    assert_eq!(kv.get("k").await?, Some(Bytes::from_static(b"v")));

    let messenger = factory.resolve_messenger("inmemory://maxMessageSize=4").await?;
    let cancel = CancellationToken::new();
    assert!(
        messenger
            .put_messages(vec![QueueMessage::new(&b"too long"[..])], &cancel)
            .await
            .is_err()
    );
    messenger
        .put_messages(vec![QueueMessage::new(&b"ok"[..])], &cancel)
        .await?;
    assert_eq!(messenger.receive_messages(5, &cancel).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn register_helper_adds_the_module() {
    let mut factory = StorageFactory::new();
    fluent_store_memory::register(&mut factory);
    assert_eq!(factory.modules().len(), 1);
    assert!(factory.resolve_store("inmemory://").await.is_ok());
}

#[tokio::test]
async fn each_resolution_is_a_fresh_instance() -> anyhow::Result<()> {
    let factory = factory();
    let first = factory.resolve_store("inmemory://").await?;
    first.put_bytes("x", Bytes::from_static(b"1")).await?;

    let second = factory.resolve_store("inmemory://").await?;
    assert!(!second.exists("x").await?);
    Ok(())
}

#[tokio::test]
async fn bad_message_size_is_invalid() {
    let err = factory()
        .resolve_messenger("inmemory://maxMessageSize=lots")
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::InvalidParameter { ref key, .. } if key == "maxMessageSize"));
}

#[tokio::test]
async fn unknown_prefix_is_unrecognized() {
    let err = factory().resolve_store("disk://path=/tmp").await.unwrap_err();
    assert!(matches!(err, ResolveError::UnrecognizedPrefix { ref prefix } if prefix == "disk"));
}

#[tokio::test]
async fn store_key_value_over_memory() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let kv = StoreKeyValue::new(store.clone(), None);

    kv.put("user/42", Bytes::from_static(b"alice")).await?;
    kv.put("weird key;=", Bytes::from_static(b"x")).await?;
    assert_eq!(kv.get("user/42").await?, Some(Bytes::from_static(b"alice")));
    assert_eq!(kv.get("nobody").await?, None);

    let mut keys = kv.keys().await?;
    keys.sort();
    assert_eq!(keys, vec!["user/42".to_string(), "weird key;=".to_string()]);
    assert_eq!(store.len(), 2);

    kv.delete("user/42").await?;
    kv.delete("user/42").await?;
    assert_eq!(kv.get("user/42").await?, None);
    Ok(())
}
