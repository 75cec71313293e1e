use fluent_core::{ResolveError, StorageFactory};
use fluent_store_s3::AwsS3Module;

fn factory() -> StorageFactory {
    StorageFactory::new().with_module(AwsS3Module)
}

#[tokio::test]
async fn missing_bucket_is_critical() {
    let err = factory()
        .resolve_store("aws.s3://region=us-east-1")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ResolveError::MissingParameter { ref key, critical: true } if key == "bucket"
    ));
}

#[tokio::test]
async fn builds_store_for_custom_endpoint() {
    // Bucket construction is offline; nothing is contacted until first use.
    let store = factory()
        .resolve_store(
            "aws.s3://bucket=test;keyId=minioadmin;key=minioadmin;serviceUrl=http://localhost:9000",
        )
        .await
        .unwrap();
    assert!(!store.features().supports_rename);
}

#[tokio::test]
async fn only_blob_storage_is_offered() {
    let err = factory()
        .resolve_messenger("aws.s3://bucket=test")
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::UnrecognizedPrefix { .. }));
}
