//! In-memory object store used by the push tests.

use super::store::{DeleteReport, ObjectEntry, ObjectStore};
use crate::transfer::fingerprint::{bytes_fingerprint, multipart_etag};
use crate::{Result, SyncError};
use bytes::Bytes;
use chrono::Utc;
use md5::{Digest, Md5};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub etag: String,
}

#[derive(Default)]
struct Upload {
    key: String,
    parts: BTreeMap<i32, Bytes>,
}

/// Request counters, for asserting on network behavior.
#[derive(Debug, Default)]
pub struct Counters {
    pub puts: AtomicUsize,
    pub heads: AtomicUsize,
    pub parts: AtomicUsize,
    pub completed: AtomicUsize,
    pub aborted: AtomicUsize,
    pub delete_requests: AtomicUsize,
}

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    uploads: Mutex<HashMap<String, Upload>>,
    put_log: Mutex<Vec<String>>,
    failing_deletes: Mutex<HashSet<String>>,
    failing_puts: Mutex<HashSet<String>>,
    pub counters: Counters,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, body: &[u8]) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                body: Bytes::copy_from_slice(body),
                etag: bytes_fingerprint(body),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    /// Keys written by `put` or a completed multipart upload, in order.
    pub fn writes(&self) -> Vec<String> {
        self.put_log.lock().unwrap().clone()
    }

    pub fn clear_writes(&self) {
        self.put_log.lock().unwrap().clear();
    }

    pub fn fail_delete(&self, key: &str) {
        self.failing_deletes.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_put(&self, key: &str) {
        self.failing_puts.lock().unwrap().insert(key.to_string());
    }

    pub fn pending_uploads(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    fn store(&self, key: &str, body: Bytes, etag: String) -> Result<()> {
        if self.failing_puts.lock().unwrap().contains(key) {
            return Err(SyncError::ObjectStore(format!("injected failure for {}", key)));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), StoredObject { body, etag });
        self.put_log.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    fn bucket(&self) -> &str {
        "memory"
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| ObjectEntry {
                key: key.clone(),
                etag: object.etag.clone(),
                last_modified: Some(Utc::now()),
            })
            .collect())
    }

    async fn head(&self, key: &str) -> Result<Option<String>> {
        self.counters.heads.fetch_add(1, Ordering::SeqCst);
        Ok(self.objects.lock().unwrap().get(key).map(|o| o.etag.clone()))
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<()> {
        self.counters.puts.fetch_add(1, Ordering::SeqCst);
        let etag = bytes_fingerprint(&body);
        self.store(key, body, etag)
    }

    async fn create_multipart(&self, key: &str) -> Result<String> {
        let mut uploads = self.uploads.lock().unwrap();
        let id = format!("upload-{}", uploads.len() + 1);
        uploads.insert(
            id.clone(),
            Upload {
                key: key.to_string(),
                ..Default::default()
            },
        );
        Ok(id)
    }

    async fn upload_part(
        &self,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String> {
        self.counters.parts.fetch_add(1, Ordering::SeqCst);
        let etag = bytes_fingerprint(&body);
        let mut uploads = self.uploads.lock().unwrap();
        let upload = uploads
            .get_mut(upload_id)
            .ok_or_else(|| SyncError::ObjectStore(format!("no upload {}", upload_id)))?;
        upload.parts.insert(part_number, body);
        Ok(etag)
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<(i32, String)>,
    ) -> Result<()> {
        let upload = self
            .uploads
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| SyncError::ObjectStore(format!("no upload {}", upload_id)))?;
        if upload.key != key || parts.len() != upload.parts.len() {
            return Err(SyncError::ObjectStore("part list mismatch".into()));
        }

        let mut body = Vec::new();
        let mut digests = Vec::new();
        for (number, data) in &upload.parts {
            if !parts.iter().any(|(n, _)| n == number) {
                return Err(SyncError::ObjectStore(format!("missing part {}", number)));
            }
            digests.push(Md5::digest(data));
            body.extend_from_slice(data);
        }

        self.counters.completed.fetch_add(1, Ordering::SeqCst);
        self.store(key, Bytes::from(body), multipart_etag(&digests))
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> Result<()> {
        self.counters.aborted.fetch_add(1, Ordering::SeqCst);
        self.uploads.lock().unwrap().remove(upload_id);
        Ok(())
    }

    async fn delete_batch(&self, keys: &[String]) -> Result<DeleteReport> {
        self.counters.delete_requests.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_deletes.lock().unwrap().clone();
        let mut objects = self.objects.lock().unwrap();
        let mut report = DeleteReport::default();
        for key in keys {
            if failing.contains(key) {
                report.failed += 1;
            } else {
                objects.remove(key);
                report.deleted += 1;
            }
        }
        Ok(report)
    }
}
