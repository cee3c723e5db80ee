//! SFTP backend: the environment is replaced on every configured host.
//!
//! Hosts are handled in parallel, each on its own session. A host that
//! cannot be reached is logged and contributes nothing; the other hosts
//! carry on.

pub mod session;
pub mod ssh;

use crate::environment::Environment;
use crate::orchestrator::ListGroup;
use crate::transfer::{PushReport, TaskPool};
use crate::{Result, SyncError};
use session::{list_host, push_host, HostSession, RemoteFs};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub use ssh::SshConnector;

/// Produces remote filesystem sessions.
pub trait Connect: Send + Sync + 'static {
    type Fs: RemoteFs + 'static;

    /// Open a session on `host`, or `None` when the host is unreachable.
    /// `verb` prefixes the log messages (`list`, `push`).
    fn connect(&self, host: &str, verb: &str) -> Option<Self::Fs>;
}

pub struct SftpBackend<C: Connect> {
    connector: Arc<C>,
    hosts: Vec<String>,
    env: Arc<Environment>,
    progress_interval: Duration,
    cancel: CancellationToken,
}

impl<C: Connect> SftpBackend<C> {
    pub fn new(
        connector: C,
        hosts: Vec<String>,
        env: Arc<Environment>,
        progress_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connector: Arc::new(connector),
            hosts,
            env,
            progress_interval,
            cancel,
        }
    }

    fn pool<T: Send + 'static>(&self, label: &str) -> TaskPool<T> {
        TaskPool::new(
            label,
            "Finished host",
            self.hosts.len(),
            self.progress_interval,
            self.cancel.clone(),
        )
    }

    /// List environments on every host. Hosts reporting the same
    /// environments are grouped together, in host order.
    pub async fn list(&self) -> Result<Vec<ListGroup>> {
        info!("SFTP list: list environments on hosts {}", self.hosts.join(","));

        let mut pool = self.pool("SFTP list");
        for host in &self.hosts {
            let connector = Arc::clone(&self.connector);
            let env = Arc::clone(&self.env);
            let host = host.clone();
            pool.spawn_blocking(host.clone(), move || {
                let Some(fs) = connector.connect(&host, "list") else {
                    return Ok(None);
                };
                let mut session = HostSession::new(host, fs);
                list_host(&mut session, &env).map(Some)
            });
        }

        let mut groups: Vec<ListGroup> = Vec::new();
        for (host, result) in pool.join().await {
            let entries = match result {
                Ok(Some(entries)) => entries,
                Ok(None) => continue,
                Err(e) => {
                    return Err(SyncError::Host {
                        host,
                        source: Box::new(e),
                    })
                }
            };

            match groups.iter_mut().find(|group| group.entries == entries) {
                Some(group) => group.hosts.push(host),
                None => groups.push(ListGroup {
                    hosts: vec![host],
                    entries,
                }),
            }
        }

        for group in &groups {
            info!(
                "SFTP list: hosts: {} environments:\n{}",
                group.hosts.join(","),
                group.report()
            );
        }
        Ok(groups)
    }

    /// Replace the environment on every reachable host.
    ///
    /// Every host runs to completion; the first host failure is returned
    /// once all of them are done.
    pub async fn upload(&self) -> Result<PushReport> {
        let started = Instant::now();
        info!("SFTP push: pushing data on hosts {}", self.hosts.join(","));

        let mut pool = self.pool("SFTP push");
        for host in &self.hosts {
            let connector = Arc::clone(&self.connector);
            let env = Arc::clone(&self.env);
            let host = host.clone();
            pool.spawn_blocking(host.clone(), move || {
                let Some(fs) = connector.connect(&host, "push") else {
                    return Ok(None);
                };
                let mut session = HostSession::new(host, fs);
                push_host(&mut session, &env).map(Some)
            });
        }

        let mut report = PushReport::default();
        let mut skipped = Vec::new();
        let mut first_error = None;
        for (host, result) in pool.join().await {
            match result {
                Ok(Some(host_report)) => report.merge(&host_report),
                Ok(None) => skipped.push(host),
                Err(e) => {
                    error!("SFTP push: host {} failed: {}", host, e);
                    first_error.get_or_insert(SyncError::Host {
                        host,
                        source: Box::new(e),
                    });
                }
            }
        }

        if !skipped.is_empty() {
            warn!("SFTP push: skipped unreachable hosts {}", skipped.join(","));
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        report.log("SFTP push", started.elapsed());
        Ok(report)
    }

    pub async fn download(&self) -> Result<()> {
        Err(SyncError::Unsupported("sftp"))
    }
}
