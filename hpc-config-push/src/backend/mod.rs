//! Destination backends.
//!
//! Every backend offers the same three operations. The backend is chosen
//! once from the configured mode.

pub mod local;
pub mod s3;
pub mod sftp;

use crate::config::{Config, Mode};
use crate::environment::Environment;
use crate::orchestrator::ListGroup;
use crate::transfer::PushReport;
use crate::{Result, SyncError};
use local::LocalBackend;
use s3::aws::AwsStore;
use s3::{S3Backend, S3Settings};
use sftp::{SftpBackend, SshConnector};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub enum Backend {
    Local(LocalBackend),
    Sftp(SftpBackend<SshConnector>),
    S3(S3Backend<AwsStore>),
}

impl Backend {
    /// Build the backend selected by `config.mode`.
    ///
    /// The object-store backend connects to its bucket here.
    pub async fn from_config(config: &Config, cancel: CancellationToken) -> Result<Self> {
        let env = Arc::new(config.environment.clone());
        let progress_interval = config.transfer.progress_interval();
        info!("Using {} backend for environment {}", config.mode.as_str(), env.name);

        match config.mode {
            Mode::Local => Ok(Backend::Local(LocalBackend::new(env, config.local.clone()))),
            Mode::Sftp => {
                let settings = config
                    .sftp
                    .as_ref()
                    .ok_or_else(|| SyncError::Config("mode sftp requires an [sftp] section".into()))?;
                Ok(Backend::Sftp(SftpBackend::new(
                    SshConnector::new(settings),
                    settings.hosts.clone(),
                    env,
                    progress_interval,
                    cancel,
                )))
            }
            Mode::S3 => {
                let settings = config
                    .s3
                    .as_ref()
                    .ok_or_else(|| SyncError::Config("mode s3 requires an [s3] section".into()))?;
                let bucket = bucket_of(&env)?;
                let store = AwsStore::connect(settings, bucket).await?;
                Ok(Backend::S3(S3Backend::new(
                    Arc::new(store),
                    env,
                    S3Settings {
                        layout: settings.layout(),
                        workers: settings.workers,
                        progress_interval,
                    },
                    cancel,
                )))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Local(_) => "local",
            Backend::Sftp(_) => "sftp",
            Backend::S3(_) => "s3",
        }
    }

    /// Environments available at the destination, grouped by host.
    pub async fn list(&self) -> Result<Vec<ListGroup>> {
        match self {
            Backend::Local(backend) => {
                let backend = backend.clone();
                tokio::task::spawn_blocking(move || backend.list()).await?
            }
            Backend::Sftp(backend) => backend.list().await,
            Backend::S3(backend) => backend.list().await,
        }
    }

    /// Push the environment to the destination.
    pub async fn upload(&self) -> Result<PushReport> {
        match self {
            Backend::Local(backend) => {
                let backend = backend.clone();
                tokio::task::spawn_blocking(move || backend.upload()).await?
            }
            Backend::Sftp(backend) => backend.upload().await,
            Backend::S3(backend) => backend.upload().await,
        }
    }

    /// Fetch the environment back from the destination. No backend
    /// implements it.
    pub async fn download(&self) -> Result<()> {
        match self {
            Backend::Local(backend) => backend.download(),
            Backend::Sftp(backend) => backend.download().await,
            Backend::S3(backend) => backend.download().await,
        }
    }
}

fn bucket_of(env: &Environment) -> Result<&str> {
    env.bucket
        .as_deref()
        .filter(|bucket| !bucket.is_empty())
        .ok_or_else(|| SyncError::Config("mode s3 requires environment.bucket".into()))
}
