//! Object store gateway: named blobs in a bucket.
//!
//! [`BlobStore`] is the narrow interface the worker and catalog depend on.
//! [`ObjectStoreGateway`] implements it over any `object_store` backend
//! (S3, local filesystem, in-memory).

mod gateway;

pub use gateway::{ObjectStoreGateway, MULTIPART_CHUNK_BYTES};

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use object_store::PutPayload;
use serde::Serialize;

/// Content type recorded on Parquet artifacts.
pub const PARQUET_CONTENT_TYPE: &str = "application/octet-stream";

/// One entry of a listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectListing {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

impl From<object_store::ObjectMeta> for ObjectListing {
    fn from(meta: object_store::ObjectMeta) -> Self {
        Self {
            key: meta.location.to_string(),
            size: meta.size as u64,
            last_modified: meta.last_modified,
        }
    }
}

/// Capability interface over one bucket.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Bucket name used to match notifications.
    fn bucket(&self) -> &str;

    /// Read a whole object.
    ///
    /// Fails with `StorageError::NotFound`, `AccessDenied` or `Transport`.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Write an object, replacing any existing one.
    async fn put(&self, key: &str, payload: PutPayload, content_type: &str) -> Result<()>;

    /// Whether the object exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Lazily list objects under a directory-like prefix, keeping only those
    /// modified strictly after `after` when given.
    fn list(
        &self,
        prefix: &str,
        after: Option<DateTime<Utc>>,
    ) -> BoxStream<'_, Result<ObjectListing>>;

    /// Resume a listing after `start_after` (exclusive, lexicographic).
    fn list_from(&self, prefix: &str, start_after: &str) -> BoxStream<'_, Result<ObjectListing>>;
}

/// Count objects under a prefix by draining a listing.
pub async fn count_objects(store: &dyn BlobStore, prefix: &str) -> Result<u64> {
    use futures::TryStreamExt;

    store
        .list(prefix, None)
        .try_fold(0u64, |count, _| futures::future::ready(Ok(count + 1)))
        .await
}
