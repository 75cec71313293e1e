use anyhow::{Context, anyhow};
use bytes::Bytes;
use fluent_core::store::{ByteStream, PathStream, PutResponse, StoreError, StoreFeatures, StoreResult};
use fluent_core::{ResolveError, StorageConnectionString};
use s3::error::S3Error;
use s3::{Bucket, Region, creds::Credentials};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::debug;

pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct S3StoreConfig {
    pub bucket_name: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible servers. Implies path-style access.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
}

impl S3StoreConfig {
    /// Reads `bucket` (required) and the optional `region`, `serviceUrl`,
    /// `keyId` and `key` parameters. Without keys, credentials come from
    /// the environment.
    pub fn from_connection_string(cs: &StorageConnectionString) -> Result<Self, ResolveError> {
        let bucket_name = cs.get_required("bucket", true)?;
        if bucket_name.is_empty() {
            return Err(ResolveError::InvalidParameter {
                key: "bucket".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        let access_key = cs.get("keyId").map(str::to_string);
        let secret_key = cs.get("key").map(str::to_string);
        let missing = match (&access_key, &secret_key) {
            (Some(_), None) => Some("key"),
            (None, Some(_)) => Some("keyId"),
            _ => None,
        };
        if let Some(key) = missing {
            return Err(ResolveError::MissingParameter {
                key: key.to_string(),
                critical: true,
            });
        }

        Ok(Self {
            bucket_name: bucket_name.to_string(),
            region: cs.get("region").map(str::to_string),
            endpoint: cs.get("serviceUrl").map(str::to_string),
            access_key,
            secret_key,
        })
    }

    fn region(&self) -> StoreResult<Region> {
        let name = self.region.as_deref().unwrap_or(DEFAULT_REGION);
        match &self.endpoint {
            Some(endpoint) => Ok(Region::Custom {
                endpoint: endpoint.clone(),
                region: name.to_string(),
            }),
            None => name
                .parse()
                .map_err(|err| anyhow!("invalid region '{name}': {err}")),
        }
    }

    fn credentials(&self) -> StoreResult<Credentials> {
        let credentials = match (&self.access_key, &self.secret_key) {
            (Some(access), Some(secret)) => {
                Credentials::new(Some(access.as_str()), Some(secret.as_str()), None, None, None)
            }
            _ => Credentials::default(),
        };
        credentials.context("failed to load S3 credentials")
    }
}

#[derive(Debug, Clone)]
pub struct S3Store {
    bucket: Box<Bucket>,
}

impl S3Store {
    /// Builds the store on the blocking pool.
    ///
    /// Without explicit keys the credential chain reads profile files and
    /// may query the instance metadata endpoint, none of which may run on
    /// an async worker.
    pub async fn connect(config: S3StoreConfig) -> StoreResult<Self> {
        tokio::task::spawn_blocking(move || Self::create(config))
            .await
            .context("s3 store construction panicked")?
    }

    /// Builds the store on the current thread. May block; see
    /// [`S3Store::connect`].
    pub fn create(config: S3StoreConfig) -> StoreResult<Self> {
        let mut bucket = Bucket::new(&config.bucket_name, config.region()?, config.credentials()?)
            .with_context(|| format!("failed to open bucket {}", config.bucket_name))?;
        if config.endpoint.is_some() {
            bucket = bucket.with_path_style();
        }
        s3::set_retries(5);
        debug!(bucket = %config.bucket_name, "opened s3 store");
        Ok(Self { bucket })
    }
}

/// Last byte of an inclusive HTTP range of `len` bytes, `len > 0`.
fn range_end(offset: u64, len: u64) -> u64 {
    offset.saturating_add(len - 1)
}

/// Maps a 404 response to [`StoreError::NotFound`].
fn not_found_aware(err: S3Error) -> anyhow::Error {
    match err {
        S3Error::HttpFailWithBody(404, _) => StoreError::NotFound.into(),
        other => other.into(),
    }
}

#[async_trait::async_trait]
impl fluent_core::store::Store for S3Store {
    async fn put_stream(&self, path: &str, stream: ByteStream) -> StoreResult<PutResponse> {
        let mut reader = StreamReader::new(stream);
        self.bucket.put_object_stream(&mut reader, path).await?;
        Ok(())
    }

    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<PutResponse> {
        self.bucket.put_object(path, &bytes).await?;
        Ok(())
    }

    fn features(&self) -> StoreFeatures {
        StoreFeatures {
            supports_rename: false,
            case_sensitive: true,
        }
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        match self.bucket.head_object(path).await {
            Ok((_, 200)) => Ok(true),
            Ok((_, 404)) | Err(S3Error::HttpFailWithBody(404, _)) => Ok(false),
            Ok((_, code)) => Err(anyhow!("unexpected http status code {code}")),
            Err(e) => Err(e.into()),
        }
    }

    async fn open_read_stream(
        &self,
        path: &str,
        offset: u64,
        max_len: Option<u64>,
    ) -> StoreResult<ByteStream> {
        let mut bucket = *self.bucket.clone();

        let range_val = match max_len {
            Some(0) => return Ok(Box::new(futures::stream::empty::<Result<Bytes, std::io::Error>>())),
            Some(len) => format!("bytes={}-{}", offset, range_end(offset, len)),
            None => format!("bytes={}-", offset),
        };
        bucket.add_header("Range", &range_val);

        let response_data = bucket
            .get_object_stream(path)
            .await
            .map_err(not_found_aware)?;
        let stream = ReaderStream::new(response_data);

        Ok(Box::new(stream))
    }

    async fn open_read_bytes(
        &self,
        path: &str,
        offset: u64,
        max_len: Option<u64>,
    ) -> StoreResult<Bytes> {
        if max_len == Some(0) {
            return Ok(Bytes::new());
        }
        let end = max_len.map(|len| range_end(offset, len));
        let res = self
            .bucket
            .get_object_range(path, offset, end)
            .await
            .map_err(not_found_aware)?;
        Ok(res.into_bytes())
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        self.bucket.delete_object(path).await?;
        Ok(())
    }

    async fn rename(&self, _: &str, _: &str) -> StoreResult<()> {
        Err(anyhow!("rename not supported by S3Store"))
    }

    async fn size(&self, path: &str) -> StoreResult<u64> {
        let (head, code) = self.bucket.head_object(path).await.map_err(not_found_aware)?;
        if code != 200 {
            return Err(anyhow!("unexpected http status code {code}"));
        }
        let len = head
            .content_length
            .ok_or_else(|| anyhow!("missing content-length"))?;
        Ok(len.try_into()?)
    }

    async fn list(&self) -> StoreResult<PathStream> {
        let results = self.bucket.list("".to_string(), None).await?;
        let paths: Vec<String> = results
            .into_iter()
            .flat_map(|res| res.contents)
            .map(|obj| obj.key)
            .collect();

        let stream = futures::stream::iter(paths.into_iter().map(Ok));
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluent_core::Store;
    use fluent_core::testutil::StoreTests;

    fn parse(text: &str) -> Result<S3StoreConfig, ResolveError> {
        S3StoreConfig::from_connection_string(&StorageConnectionString::parse(text).unwrap())
    }

    #[test]
    fn full_config() {
        let config = parse(
            "aws.s3://bucket=logs;region=eu-west-1;keyId=AKIA;key=c2VjcmV0==;serviceUrl=http://localhost:9000",
        )
        .unwrap();
        assert_eq!(config.bucket_name, "logs");
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.access_key.as_deref(), Some("AKIA"));
        assert_eq!(config.secret_key.as_deref(), Some("c2VjcmV0=="));
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:9000"));

        match config.region().unwrap() {
            Region::Custom { endpoint, region } => {
                assert_eq!(endpoint, "http://localhost:9000");
                assert_eq!(region, "eu-west-1");
            }
            other => panic!("expected custom region, got {other:?}"),
        }
    }

    #[test]
    fn range_end_saturates() {
        assert_eq!(range_end(0, 1), 0);
        assert_eq!(range_end(10, 5), 14);
        assert_eq!(range_end(u64::MAX - 1, 10), u64::MAX);
        assert_eq!(range_end(u64::MAX, u64::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn connect_builds_off_the_async_worker() {
        let config = parse("aws.s3://bucket=b;keyId=id;key=secret;serviceUrl=http://localhost:9000")
            .unwrap();
        let store = S3Store::connect(config).await.unwrap();
        assert!(!store.features().supports_rename);
    }

    #[test]
    fn bucket_is_critical() {
        assert!(matches!(
            parse("aws.s3://region=us-east-1"),
            Err(ResolveError::MissingParameter { ref key, critical: true }) if key == "bucket"
        ));
    }

    #[test]
    fn keys_come_in_pairs() {
        assert!(matches!(
            parse("aws.s3://bucket=b;keyId=AKIA"),
            Err(ResolveError::MissingParameter { ref key, .. }) if key == "key"
        ));
        assert!(matches!(
            parse("aws.s3://bucket=b;key=secret"),
            Err(ResolveError::MissingParameter { ref key, .. }) if key == "keyId"
        ));
        let config = parse("aws.s3://bucket=b").unwrap();
        assert_eq!(config.access_key, None);
        assert_eq!(config.region, None);
    }

    // S3 tests require a running S3-compatible server (e.g., MinIO)
    #[tokio::test]
    #[ignore = "requires S3-compatible server"]
    async fn test_s3_store() {
        let config = S3StoreConfig {
            endpoint: Some("http://localhost:9000".to_string()),
            region: Some("us-east-1".to_string()),
            bucket_name: "test-bucket".to_string(),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
        };
        let store = S3Store::connect(config).await.unwrap();
        StoreTests::new(&store).run_all().await.unwrap();
    }
}
