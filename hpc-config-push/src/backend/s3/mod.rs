//! Object-storage backend.
//!
//! A push takes one snapshot of the objects under the environment prefix,
//! uploads only the files whose fingerprint differs from the snapshot,
//! materializes directory markers for every new ancestor, then removes the
//! objects of the snapshot that nothing in the push accounts for.

pub mod aws;
pub mod index;
#[cfg(test)]
pub mod memory;
pub mod store;

use crate::environment::{join_key, Environment};
use crate::fs::{enumerate, metadata::LIST_TIME_FORMAT};
use crate::orchestrator::{self, EnvEntry, ListGroup};
use crate::transfer::fingerprint::{file_fingerprint, PartLayout};
use crate::transfer::{PushReport, TaskPool};
use crate::{Result, SyncError};
use bytes::Bytes;
use index::{is_marker, parent_marker, stale_keys, RemoteIndex};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use store::{delete_many, DeleteReport, ObjectStore};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct S3Settings {
    pub layout: PartLayout,

    /// Concurrent file transfers
    pub workers: usize,

    pub progress_interval: Duration,
}

pub struct S3Backend<S: ObjectStore> {
    store: Arc<S>,
    env: Arc<Environment>,
    settings: S3Settings,
    cancel: CancellationToken,
}

/// A file to push and its destination key.
#[derive(Debug, Clone)]
struct UploadJob {
    source: PathBuf,
    key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Unchanged,
    Uploaded(u64),
}

/// Directory markers known to exist during one push.
#[derive(Debug, Default)]
struct DirectoryMarkers {
    known: HashSet<String>,
    created: Vec<String>,
}

impl DirectoryMarkers {
    /// Make sure every ancestor marker of `key` exists.
    ///
    /// Walks upward until an ancestor is known (created or probed during
    /// this push, then the snapshot, then a live probe) and creates the
    /// missing ones top-down.
    async fn ensure<S: ObjectStore + ?Sized>(
        &mut self,
        store: &S,
        index: &RemoteIndex,
        key: &str,
    ) -> Result<()> {
        let mut missing = Vec::new();
        let mut current = parent_marker(key);

        while let Some(marker) = current {
            if self.known.contains(&marker) || index.contains(&marker) {
                break;
            }
            if store.head(&marker).await?.is_some() {
                self.known.insert(marker);
                break;
            }
            current = parent_marker(&marker);
            missing.push(marker);
        }

        for marker in missing.into_iter().rev() {
            debug!("S3 upload: Creating directory {}", marker);
            store.put(&marker, Bytes::new()).await?;
            self.known.insert(marker.clone());
            self.created.push(marker);
        }

        Ok(())
    }
}

impl<S: ObjectStore> S3Backend<S> {
    pub fn new(
        store: Arc<S>,
        env: Arc<Environment>,
        settings: S3Settings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            env,
            settings,
            cancel,
        }
    }

    /// List environments under the destination root.
    ///
    /// An environment shows up through its marker `<root>/<name>/` or any
    /// object directly below it.
    pub async fn list(&self) -> Result<Vec<ListGroup>> {
        info!("S3 list: listing environments in bucket {}", self.store.bucket());

        let root = self.env.root_key();
        let prefix = if root.is_empty() {
            String::new()
        } else {
            format!("{}/", root)
        };

        info!("S3 list: get remote objects list");
        let objects = self.store.list(&prefix).await?;

        // `<root>/<env>/` markers and `<root>/<env>/<file>` objects, latest wins
        let mut latest: BTreeMap<&str, Option<DateTime<Utc>>> = BTreeMap::new();
        for object in &objects {
            let Some(name) = environment_name(&object.key, &prefix) else {
                continue;
            };
            let modified = latest.entry(name).or_default();
            if object.last_modified > *modified {
                *modified = object.last_modified;
            }
        }

        let entries: Vec<EnvEntry> = latest
            .into_iter()
            .map(|(name, modified)| {
                let modified = modified
                    .map(|t| t.format(LIST_TIME_FORMAT).to_string())
                    .unwrap_or_default();
                EnvEntry::new(name, modified)
            })
            .collect();

        let group = ListGroup {
            hosts: Vec::new(),
            entries,
        };
        if group.entries.is_empty() {
            info!("S3 list: no environment");
        } else {
            info!("S3 list: available environments:\n{}", group.report());
        }
        Ok(vec![group])
    }

    /// Push the environment and prune stale objects.
    pub async fn upload(&self) -> Result<PushReport> {
        let started = Instant::now();
        info!("S3 push: pushing data in bucket {}", self.store.bucket());

        let destination = self.env.destination_key();
        info!("S3 push: get remote objects list");
        let index = RemoteIndex::snapshot(&*self.store, &format!("{}/", destination)).await?;
        debug!("S3 push: {} remote objects under {}", index.len(), destination);

        let mut jobs = Vec::new();
        orchestrator::drive(&self.env, "S3 push", &mut jobs, |step, jobs| {
            let step_destination = join_key(&destination, &step.destination);
            for entry in enumerate(&step.source)? {
                jobs.push(UploadJob {
                    key: entry.destination_key(&step_destination),
                    source: entry.source,
                });
            }
            Ok(())
        })?;

        let mut markers = DirectoryMarkers::default();
        let mut pool = TaskPool::new(
            "S3 push",
            "Transferred files",
            self.settings.workers,
            self.settings.progress_interval,
            self.cancel.clone(),
        );

        let mut first_error = None;
        for job in jobs {
            // Tasks already dispatched must still be joined
            if let Err(e) = markers.ensure(&*self.store, &index, &job.key).await {
                error!("S3 push: cannot create directories for {}: {}", job.key, e);
                first_error = Some(e);
                break;
            }

            let store = Arc::clone(&self.store);
            let remote = index.etag(&job.key).map(str::to_string);
            let layout = self.settings.layout;
            let key = job.key.clone();
            pool.spawn(key, async move { upload_object(store, job, remote, layout).await });
        }

        let mut report = PushReport {
            directories_created: markers.created.len(),
            ..Default::default()
        };
        let mut touched: BTreeSet<String> = markers.created.into_iter().collect();

        for (key, result) in pool.join().await {
            match result {
                Ok(Transfer::Unchanged) => {
                    report.unchanged_files += 1;
                    touched.insert(key);
                }
                Ok(Transfer::Uploaded(bytes)) => {
                    report.transferred_files += 1;
                    report.transferred_bytes += bytes;
                    touched.insert(key);
                }
                Err(e) => {
                    error!("S3 push: upload of {} failed: {}", key, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        info!("S3 push: Removing old files");
        let deletion = self.remove_old_objects(&index, &touched).await;
        report.deleted = deletion.deleted;
        report.delete_failures = deletion.failed;

        report.log("S3 push", started.elapsed());
        Ok(report)
    }

    pub async fn download(&self) -> Result<()> {
        Err(SyncError::Unsupported("s3"))
    }

    /// Delete the snapshot objects the push did not touch.
    ///
    /// Failures are logged and counted; the pushed content stays in place.
    async fn remove_old_objects(&self, index: &RemoteIndex, touched: &BTreeSet<String>) -> DeleteReport {
        let stale = stale_keys(index, touched);
        for key in &stale {
            if is_marker(key) {
                debug!("S3 push: Removing old dir: {}", key);
            } else {
                debug!("S3 push: Removing old file: {}", key);
            }
        }
        info!("S3 push: {} files to remove.", stale.len());

        if stale.is_empty() {
            return DeleteReport::default();
        }

        let report = match delete_many(&*self.store, &stale).await {
            Ok(report) => report,
            Err(e) => {
                error!("S3 push: batch delete failed: {}", e);
                DeleteReport {
                    deleted: 0,
                    failed: stale.len(),
                }
            }
        };

        debug!("S3 push: {} deleted, {} errors", report.deleted, report.failed);
        if report.failed > 0 {
            error!("S3 push: Failed to delete {} old keys", report.failed);
        }
        report
    }
}

/// Environment name of `key` when it is `<prefix><env>/` or
/// `<prefix><env>/<file>`.
fn environment_name<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    let (name, rest) = key.strip_prefix(prefix)?.split_once('/')?;
    if name.is_empty() || rest.contains('/') {
        return None;
    }
    Some(name)
}

/// Upload one file unless the remote copy has the same fingerprint.
///
/// `remote` is the etag from the snapshot; a key missing from the snapshot
/// is probed directly.
async fn upload_object<S: ObjectStore + ?Sized>(
    store: Arc<S>,
    job: UploadJob,
    remote: Option<String>,
    layout: PartLayout,
) -> Result<Transfer> {
    let remote = match remote {
        Some(etag) => Some(etag),
        None => store.head(&job.key).await?,
    };

    let size = tokio::fs::metadata(&job.source).await?.len();
    let source = job.source.clone();
    let local = tokio::task::spawn_blocking(move || file_fingerprint(&source, size, layout)).await??;

    if remote.as_deref() == Some(local.as_str()) {
        debug!("S3 upload: MD5 Match for file {}", job.source.display());
        return Ok(Transfer::Unchanged);
    }
    debug!(
        "S3 upload: MD5 Mismatch for file {} ({} != {})",
        job.source.display(),
        remote.as_deref().unwrap_or("none"),
        local
    );

    if layout.is_multipart(size) {
        debug!("S3 upload: multipart upload for {}", job.source.display());
        multipart_upload(&*store, &job.source, &job.key, layout).await?;
    } else {
        debug!("S3 upload: singlepart upload for {}", job.source.display());
        let body = tokio::fs::read(&job.source).await?;
        store.put(&job.key, Bytes::from(body)).await?;
    }

    debug!("S3 upload: {} bytes written for {}", size, job.source.display());
    Ok(Transfer::Uploaded(size))
}

async fn multipart_upload<S: ObjectStore + ?Sized>(
    store: &S,
    source: &Path,
    key: &str,
    layout: PartLayout,
) -> Result<()> {
    let upload_id = store.create_multipart(key).await?;

    let result = async {
        let parts = send_parts(store, source, key, &upload_id, layout).await?;
        store.complete_multipart(key, &upload_id, parts).await
    }
    .await;

    if let Err(e) = result {
        if let Err(abort_err) = store.abort_multipart(key, &upload_id).await {
            warn!("S3 upload: failed to abort multipart upload of {}: {}", key, abort_err);
        }
        return Err(e);
    }
    Ok(())
}

/// Upload the file sequentially in parts numbered from 1.
async fn send_parts<S: ObjectStore + ?Sized>(
    store: &S,
    source: &Path,
    key: &str,
    upload_id: &str,
    layout: PartLayout,
) -> Result<Vec<(i32, String)>> {
    let mut file = tokio::fs::File::open(source).await?;
    let part_size = layout.part_size as usize;
    let mut parts = Vec::new();

    loop {
        let mut buffer = vec![0u8; part_size];
        let filled = read_part_async(&mut file, &mut buffer).await?;
        if filled == 0 {
            break;
        }
        buffer.truncate(filled);

        let number = parts.len() as i32 + 1;
        debug!("S3 upload: uploading part {} of {}", number, key);
        let etag = store.upload_part(key, upload_id, number, Bytes::from(buffer)).await?;
        parts.push((number, etag));

        if filled < part_size {
            break;
        }
    }

    Ok(parts)
}

async fn read_part_async(file: &mut tokio::fs::File, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = file.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
