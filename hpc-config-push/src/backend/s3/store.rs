//! Object store adapter trait.
//!
//! The push engine only needs a handful of primitives; each store
//! implementation handles the raw requests and nothing else. Every write
//! is made with a public-read access policy.

use crate::Result;
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Maximum number of keys per batch delete request
pub const DELETE_BATCH: usize = 1000;

/// One object returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,

    /// Entity tag with surrounding quotes stripped
    pub etag: String,

    pub last_modified: Option<DateTime<Utc>>,
}

/// Outcome of a batch delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub deleted: usize,
    pub failed: usize,
}

impl DeleteReport {
    pub fn merge(&mut self, other: DeleteReport) {
        self.deleted += other.deleted;
        self.failed += other.failed;
    }
}

#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Bucket name, for log messages
    fn bucket(&self) -> &str;

    /// List every object whose key starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>>;

    /// Entity tag of one object, `None` when absent.
    async fn head(&self, key: &str) -> Result<Option<String>>;

    /// Write a whole object in one request.
    async fn put(&self, key: &str, body: Bytes) -> Result<()>;

    /// Start a multipart upload and return its id.
    async fn create_multipart(&self, key: &str) -> Result<String>;

    /// Upload one part (numbered from 1) and return its entity tag.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String>;

    /// Finalize a multipart upload from `(part number, etag)` pairs.
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<(i32, String)>,
    ) -> Result<()>;

    /// Drop the parts of an unfinished multipart upload.
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()>;

    /// Delete up to [`DELETE_BATCH`] keys in one request.
    async fn delete_batch(&self, keys: &[String]) -> Result<DeleteReport>;
}

/// Delete `keys` in as few requests as the store allows.
pub async fn delete_many<S: ObjectStore + ?Sized>(store: &S, keys: &[String]) -> Result<DeleteReport> {
    let mut report = DeleteReport::default();
    for chunk in keys.chunks(DELETE_BATCH) {
        report.merge(store.delete_batch(chunk).await?);
    }
    Ok(report)
}
