//! Configuration management for the push tool.
//!
//! Loads configuration from a TOML file with environment variable overrides
//! (`HPC_CONFIG_PUSH__S3__SECRET_KEY=...`).

use crate::environment::Environment;
use crate::transfer::fingerprint::PartLayout;
use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of environment variables overriding file settings
pub const ENV_PREFIX: &str = "HPC_CONFIG_PUSH";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Destination kind
    pub mode: Mode,

    pub environment: Environment,

    #[serde(default)]
    pub local: LocalConfig,

    #[serde(default)]
    pub sftp: Option<SftpConfig>,

    #[serde(default)]
    pub s3: Option<S3Config>,

    #[serde(default)]
    pub transfer: TransferConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[serde(alias = "posix")]
    Local,
    Sftp,
    S3,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Local => "local",
            Mode::Sftp => "sftp",
            Mode::S3 => "s3",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Mode applied to every pushed directory
    #[serde(default = "default_dir_mode")]
    pub dir_mode: u32,

    /// Mode applied to every pushed file
    #[serde(default = "default_file_mode")]
    pub file_mode: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SftpConfig {
    /// Hosts receiving the environment
    pub hosts: Vec<String>,

    pub username: String,

    /// Private key used for authentication
    pub private_key: PathBuf,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Timeout of each blocking SSH/SFTP call in seconds (0 = none)
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub access_key: String,

    pub secret_key: String,

    /// Object store host name
    pub host: String,

    #[serde(default = "default_s3_port")]
    pub port: u16,

    /// Use HTTPS
    #[serde(default)]
    pub secure: bool,

    /// Signing region
    #[serde(default = "default_region")]
    pub region: String,

    /// Files at or above this size are uploaded in parts
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: u64,

    /// Size of each part of a multipart upload
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Concurrent file transfers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Timeout of each request in seconds (0 = none)
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Interval between progress lines, in milliseconds
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_dir_mode() -> u32 {
    0o755
}

fn default_file_mode() -> u32 {
    0o644
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_operation_timeout() -> u64 {
    300
}

fn default_s3_port() -> u16 {
    7480
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_multipart_threshold() -> u64 {
    20 * 1000 * 1000
}

fn default_part_size() -> u64 {
    6 * 1000 * 1000
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_progress_interval() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            dir_mode: default_dir_mode(),
            file_mode: default_file_mode(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: default_progress_interval(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl TransferConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }
}

impl SftpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

impl S3Config {
    pub fn endpoint(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn layout(&self) -> PartLayout {
        PartLayout {
            multipart_threshold: self.multipart_threshold,
            part_size: self.part_size,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text, without environment overrides
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.environment.validate()?;

        match self.mode {
            Mode::Local => {}
            Mode::Sftp => {
                let sftp = self
                    .sftp
                    .as_ref()
                    .ok_or_else(|| SyncError::Config("mode sftp requires an [sftp] section".into()))?;
                if sftp.hosts.is_empty() {
                    return Err(SyncError::Config("[sftp] hosts must not be empty".into()));
                }
            }
            Mode::S3 => {
                let s3 = self
                    .s3
                    .as_ref()
                    .ok_or_else(|| SyncError::Config("mode s3 requires an [s3] section".into()))?;
                if self.environment.bucket.as_deref().map_or(true, str::is_empty) {
                    return Err(SyncError::Config("mode s3 requires environment.bucket".into()));
                }
                if s3.part_size == 0 || s3.part_size > s3.multipart_threshold {
                    return Err(SyncError::Config(format!(
                        "part_size ({}) must be non-zero and not above multipart_threshold ({})",
                        s3.part_size, s3.multipart_threshold
                    )));
                }
            }
        }

        Ok(())
    }
}
