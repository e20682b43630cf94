//! `object_store` backed implementation of [`BlobStore`].
//!
//! Store URLs:
//! - `s3://bucket[/root]`: Amazon S3 or an S3-compatible endpoint
//! - `memory://name`: in-memory store (tests, local runs)
//! - anything else: a local directory, created if missing

use super::{BlobStore, ObjectListing};
use crate::config::StorageConfig;
use crate::error::{NotificationError, StorageError};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::prefix::PrefixStore;
use object_store::{
    Attribute, Attributes, ObjectStore, PutMultipartOpts, PutOptions, PutPayload, WriteMultipart,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Part size for multipart uploads (S3 minimum is 5 MiB).
pub const MULTIPART_CHUNK_BYTES: usize = 8 * 1024 * 1024;

/// Parts uploaded concurrently during a multipart write.
const MULTIPART_CONCURRENCY: usize = 4;

/// Gateway over an `object_store` backend.
#[derive(Debug, Clone)]
pub struct ObjectStoreGateway {
    bucket: String,
    store: Arc<dyn ObjectStore>,
    multipart_threshold: usize,
    supports_attributes: bool,
}

impl ObjectStoreGateway {
    /// Wrap an existing store.
    pub fn new(bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            bucket: bucket.into(),
            store,
            multipart_threshold: 16 * 1024 * 1024,
            supports_attributes: true,
        }
    }

    /// In-memory gateway for tests and local runs.
    pub fn in_memory(bucket: impl Into<String>) -> Self {
        Self::new(bucket, Arc::new(InMemory::new()))
    }

    /// Payloads above this size use multipart upload.
    pub fn with_multipart_threshold(mut self, bytes: usize) -> Self {
        self.multipart_threshold = bytes.max(MULTIPART_CHUNK_BYTES);
        self
    }

    /// Underlying store, for callers that need the raw API.
    pub fn inner(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Build a gateway for one of the configured store URLs.
    pub fn from_url(url: &str, config: &StorageConfig) -> Result<Self> {
        let gateway = if let Some(rest) = url.strip_prefix("s3://") {
            Self::create_s3_store(rest, config)?
        } else if let Some(name) = url.strip_prefix("memory://") {
            Self::in_memory(name.trim_end_matches('/'))
        } else {
            Self::create_local_store(url.strip_prefix("file://").unwrap_or(url))?
        };

        Ok(gateway.with_multipart_threshold(config.multipart_threshold_bytes))
    }

    fn create_s3_store(location: &str, config: &StorageConfig) -> Result<Self> {
        let (bucket, root) = match location.split_once('/') {
            Some((bucket, root)) => (bucket, root.trim_matches('/')),
            None => (location, ""),
        };
        if bucket.is_empty() {
            return Err(StorageError::InvalidLocation(format!("s3://{location}")).into());
        }

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);

        if let Some(ref region) = config.region {
            builder = builder.with_region(region);
        }

        if let Some(ref access_key) = config.access_key_id {
            builder = builder.with_access_key_id(access_key);
        }

        if let Some(ref secret_key) = config.secret_access_key {
            builder = builder.with_secret_access_key(secret_key);
        }

        if let Some(ref endpoint) = config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(config.allow_http || endpoint.starts_with("http://"));
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::InvalidLocation(format!("s3://{location}: {e}")))?;

        let store: Arc<dyn ObjectStore> = if root.is_empty() {
            Arc::new(store)
        } else {
            Arc::new(PrefixStore::new(store, root))
        };

        Ok(Self::new(bucket, store))
    }

    fn create_local_store(path: &str) -> Result<Self> {
        let path = std::path::Path::new(path);

        if !path.exists() {
            std::fs::create_dir_all(path)?;
        }

        let store = LocalFileSystem::new_with_prefix(path)
            .map_err(|e| StorageError::InvalidLocation(format!("{}: {e}", path.display())))?;

        let bucket = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "local".to_string());

        let mut gateway = Self::new(bucket, Arc::new(store));
        // The local backend rejects object attributes.
        gateway.supports_attributes = false;
        Ok(gateway)
    }

    fn attributes(&self, content_type: &str) -> Attributes {
        let mut attributes = Attributes::new();
        if self.supports_attributes {
            attributes.insert(Attribute::ContentType, content_type.to_string().into());
        }
        attributes
    }

    async fn put_multipart(
        &self,
        path: &ObjectPath,
        payload: PutPayload,
        attributes: Attributes,
    ) -> std::result::Result<(), object_store::Error> {
        let upload = self
            .store
            .put_multipart_opts(
                path,
                PutMultipartOpts {
                    attributes,
                    ..Default::default()
                },
            )
            .await?;

        let mut writer = WriteMultipart::new_with_chunk_size(upload, MULTIPART_CHUNK_BYTES);
        for chunk in payload.iter() {
            if let Err(e) = writer.wait_for_capacity(MULTIPART_CONCURRENCY).await {
                writer.abort().await.ok();
                return Err(e);
            }
            writer.write(chunk);
        }

        writer.finish().await.map(|_| ())
    }
}

/// Address `key` verbatim; keys `object_store` cannot address are rejected
/// rather than re-encoded into a different object.
fn object_path(key: &str) -> Result<ObjectPath> {
    ObjectPath::parse(key).map_err(|e| {
        NotificationError::InvalidKey {
            key: key.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Attach the key to transport errors, which `object_store` reports without one.
fn storage_error(key: &str, err: object_store::Error) -> Error {
    match StorageError::from(err) {
        StorageError::Transport { message, .. } => StorageError::Transport {
            path: key.to_string(),
            message,
        }
        .into(),
        other => other.into(),
    }
}

#[async_trait]
impl BlobStore for ObjectStoreGateway {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = object_path(key)?;
        let result = self
            .store
            .get(&path)
            .await
            .map_err(|e| storage_error(key, e))?;
        let bytes = result.bytes().await.map_err(|e| storage_error(key, e))?;
        debug!(bucket = %self.bucket, key, bytes = bytes.len(), "Fetched object");
        Ok(bytes)
    }

    async fn put(&self, key: &str, payload: PutPayload, content_type: &str) -> Result<()> {
        let path = object_path(key)?;
        let size = payload.content_length();
        let attributes = self.attributes(content_type);

        let result = if size > self.multipart_threshold {
            debug!(bucket = %self.bucket, key, size, "Using multipart upload");
            self.put_multipart(&path, payload, attributes).await
        } else {
            self.store
                .put_opts(
                    &path,
                    payload,
                    PutOptions {
                        attributes,
                        ..Default::default()
                    },
                )
                .await
                .map(|_| ())
        };

        result.map_err(|e| {
            warn!(bucket = %self.bucket, key, error = %e, "Object write failed");
            storage_error(key, e)
        })?;
        debug!(bucket = %self.bucket, key, size, "Stored object");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self.store.head(&object_path(key)?).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(storage_error(key, e)),
        }
    }

    fn list(
        &self,
        prefix: &str,
        after: Option<DateTime<Utc>>,
    ) -> BoxStream<'_, Result<ObjectListing>> {
        let label = prefix.to_string();
        let prefix = match object_path(prefix) {
            Ok(prefix) => prefix,
            Err(e) => return futures::stream::once(async move { Err(e) }).boxed(),
        };
        let listing = if prefix.as_ref().is_empty() {
            self.store.list(None)
        } else {
            self.store.list(Some(&prefix))
        };

        listing
            .map_ok(ObjectListing::from)
            .map_err(move |e| storage_error(&label, e))
            .try_filter(move |entry| {
                let keep = after.map_or(true, |after| entry.last_modified > after);
                futures::future::ready(keep)
            })
            .boxed()
    }

    fn list_from(&self, prefix: &str, start_after: &str) -> BoxStream<'_, Result<ObjectListing>> {
        let label = prefix.to_string();
        let (prefix, offset) = match (object_path(prefix), object_path(start_after)) {
            (Ok(prefix), Ok(offset)) => (prefix, offset),
            (Err(e), _) | (_, Err(e)) => {
                return futures::stream::once(async move { Err(e) }).boxed()
            }
        };
        let prefix = if prefix.as_ref().is_empty() {
            None
        } else {
            Some(prefix)
        };

        self.store
            .list_with_offset(prefix.as_ref(), &offset)
            .map_ok(ObjectListing::from)
            .map_err(move |e| storage_error(&label, e))
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::storage::count_objects;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let gateway = ObjectStoreGateway::in_memory("raw-bucket");
        gateway
            .put(
                "raw/a.jsonl",
                PutPayload::from_static(b"{\"a\":1}\n"),
                "application/x-ndjson",
            )
            .await
            .unwrap();

        let bytes = gateway.get("raw/a.jsonl").await.unwrap();
        assert_eq!(&bytes[..], b"{\"a\":1}\n");
        assert!(gateway.exists("raw/a.jsonl").await.unwrap());
        assert!(!gateway.exists("raw/b.jsonl").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let gateway = ObjectStoreGateway::in_memory("raw-bucket");
        let err = gateway.get("raw/missing.jsonl").await.unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_keys_are_addressed_verbatim() {
        let gateway = ObjectStoreGateway::in_memory("raw-bucket");
        gateway
            .inner()
            .put(
                &ObjectPath::parse("raw/50%.jsonl").unwrap(),
                PutPayload::from_static(b"{}"),
            )
            .await
            .unwrap();

        assert_eq!(&gateway.get("raw/50%.jsonl").await.unwrap()[..], b"{}");
        assert!(!gateway.exists("raw/50%25.jsonl").await.unwrap());
    }

    #[tokio::test]
    async fn test_unaddressable_key_is_rejected() {
        let gateway = ObjectStoreGateway::in_memory("raw-bucket");
        for key in ["raw//a.jsonl", "raw/../a.jsonl"] {
            let err = gateway.get(key).await.unwrap_err();
            assert!(
                matches!(err, Error::Notification(NotificationError::InvalidKey { .. })),
                "{key}: {err}"
            );
        }
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let gateway = ObjectStoreGateway::in_memory("b");
        gateway
            .put("k", PutPayload::from_static(b"first"), "text/plain")
            .await
            .unwrap();
        gateway
            .put("k", PutPayload::from_static(b"second"), "text/plain")
            .await
            .unwrap();
        assert_eq!(&gateway.get("k").await.unwrap()[..], b"second");
    }

    #[tokio::test]
    async fn test_multipart_put_of_chunked_payload() {
        let gateway = ObjectStoreGateway::in_memory("b").with_multipart_threshold(0);
        let chunk = Bytes::from(vec![7u8; MULTIPART_CHUNK_BYTES / 2]);
        let payload: PutPayload = (0..5).map(|_| chunk.clone()).collect();
        let expected = payload.content_length();

        gateway
            .put("processed/big.parquet", payload, "application/octet-stream")
            .await
            .unwrap();

        let stored = gateway.get("processed/big.parquet").await.unwrap();
        assert_eq!(stored.len(), expected);
        assert!(stored.iter().all(|b| *b == 7));
    }

    #[tokio::test]
    async fn test_list_filters_and_orders() {
        let gateway = ObjectStoreGateway::in_memory("b");
        for key in ["raw/c.jsonl", "raw/a.jsonl", "raw/b.jsonl", "processed/x.parquet"] {
            gateway
                .put(key, PutPayload::from_static(b"x"), "text/plain")
                .await
                .unwrap();
        }

        let keys: Vec<String> = gateway
            .list("raw/", None)
            .map_ok(|entry| entry.key)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(keys, vec!["raw/a.jsonl", "raw/b.jsonl", "raw/c.jsonl"]);

        let future_cutoff = Utc::now() + chrono::Duration::hours(1);
        let none: Vec<ObjectListing> = gateway
            .list("raw/", Some(future_cutoff))
            .try_collect()
            .await
            .unwrap();
        assert!(none.is_empty());

        let resumed: Vec<String> = gateway
            .list_from("raw/", "raw/a.jsonl")
            .map_ok(|entry| entry.key)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(resumed, vec!["raw/b.jsonl", "raw/c.jsonl"]);

        assert_eq!(count_objects(&gateway, "").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_local_store_from_url() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("raw-bucket");
        let config = test_config().storage;

        let gateway = ObjectStoreGateway::from_url(root.to_str().unwrap(), &config).unwrap();
        assert_eq!(gateway.bucket(), "raw-bucket");

        gateway
            .put("raw/a.jsonl", PutPayload::from_static(b"{}"), "application/x-ndjson")
            .await
            .unwrap();
        assert!(root.join("raw").join("a.jsonl").exists());
        assert_eq!(&gateway.get("raw/a.jsonl").await.unwrap()[..], b"{}");
    }

    #[test]
    fn test_memory_store_from_url() {
        let config = test_config().storage;
        let gateway = ObjectStoreGateway::from_url("memory://processed-bucket", &config).unwrap();
        assert_eq!(gateway.bucket(), "processed-bucket");
    }

    #[test]
    fn test_invalid_s3_url() {
        let config = test_config().storage;
        assert!(ObjectStoreGateway::from_url("s3://", &config).is_err());
    }
}
