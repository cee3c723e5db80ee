//! Bounded worker pool with periodic progress reporting.
//!
//! Every dispatched task is keyed (a destination key, a host name) so that a
//! failure can be attributed when results are joined. Concurrency is bounded
//! by a semaphore; blocking work (SFTP sessions, local copies) goes through
//! `spawn_blocking` while holding a permit.

use crate::{Result, SyncError};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct TaskPool<T> {
    label: String,
    unit: String,
    semaphore: Arc<Semaphore>,
    handles: Vec<(String, JoinHandle<Result<T>>)>,
    completed: Arc<AtomicUsize>,
    progress_interval: Duration,
    cancel: CancellationToken,
}

impl<T: Send + 'static> TaskPool<T> {
    /// Create a pool running at most `workers` tasks at once.
    ///
    /// Progress lines read `"<label>: <unit> done/total"`.
    pub fn new(
        label: impl Into<String>,
        unit: impl Into<String>,
        workers: usize,
        progress_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            label: label.into(),
            unit: unit.into(),
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
            handles: Vec::new(),
            completed: Arc::new(AtomicUsize::new(0)),
            progress_interval,
            cancel,
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Dispatch an async task.
    pub fn spawn<F>(&mut self, key: impl Into<String>, task: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let completed = Arc::clone(&self.completed);
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            let result = run_bounded(semaphore, cancel, task).await;
            completed.fetch_add(1, Ordering::Relaxed);
            result
        });

        self.handles.push((key.into(), handle));
    }

    /// Dispatch a blocking task on the blocking thread pool.
    pub fn spawn_blocking<F>(&mut self, key: impl Into<String>, task: F)
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        self.spawn(key, async move {
            match tokio::task::spawn_blocking(task).await {
                Ok(result) => result,
                Err(e) => Err(SyncError::Task(e)),
            }
        });
    }

    /// Wait for every task, logging progress on each interval tick.
    ///
    /// Results are returned in dispatch order. A task that failed or panicked
    /// does not stop the others; its error is returned under its key.
    pub async fn join(self) -> Vec<(String, Result<T>)> {
        let total = self.handles.len();
        let mut results = Vec::with_capacity(total);
        let mut interval = tokio::time::interval(self.progress_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        for (key, mut handle) in self.handles {
            let joined = loop {
                tokio::select! {
                    joined = &mut handle => break joined,
                    _ = interval.tick() => {
                        info!(
                            "{}: {} {}/{}",
                            self.label,
                            self.unit,
                            self.completed.load(Ordering::Relaxed),
                            total
                        );
                    }
                }
            };

            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(SyncError::Task(e)),
            };
            results.push((key, result));
        }

        info!("{}: {} {}/{}", self.label, self.unit, total, total);
        results
    }
}

async fn run_bounded<T, F>(
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    task: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(SyncError::Cancelled);
    }

    let _permit = tokio::select! {
        permit = semaphore.acquire_owned() => permit.map_err(|_| SyncError::Cancelled)?,
        _ = cancel.cancelled() => return Err(SyncError::Cancelled),
    };

    tokio::select! {
        result = task => result,
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
    }
}
