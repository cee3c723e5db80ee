//! Error types for environment synchronization.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Connection error ({verb}) on {host}: {message}")]
    Connection {
        host: String,
        verb: String,
        message: String,
    },

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("Object store error: {0}")]
    ObjectStore(String),

    #[error("Transfer of {path} failed: {message}")]
    Transfer { path: String, message: String },

    #[error("Host {host} failed: {source}")]
    Host {
        host: String,
        #[source]
        source: Box<SyncError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Operation not implemented for the {0} backend")]
    Unsupported(&'static str),
}

impl SyncError {
    pub fn transfer(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        SyncError::Transfer {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// True for the permanent "this backend cannot do that" condition.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, SyncError::Unsupported(_))
    }
}

impl From<config::ConfigError> for SyncError {
    fn from(e: config::ConfigError) -> Self {
        SyncError::Config(e.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(e: toml::de::Error) -> Self {
        SyncError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_result_is_error_result() {
        let result: crate::Result<()> = Err(SyncError::Cancelled);
        let same: Result<()> = result;
        assert!(matches!(same, Err(SyncError::Cancelled)));
    }

    #[test]
    fn test_unsupported_is_distinct() {
        let err = SyncError::Unsupported("s3");
        assert!(err.is_unsupported());
        assert_eq!(err.to_string(), "Operation not implemented for the s3 backend");

        let err = SyncError::transfer("a/b", "broken pipe");
        assert!(!err.is_unsupported());
    }

    #[test]
    fn test_host_error_names_host() {
        let err = SyncError::Host {
            host: "node1".into(),
            source: Box::new(SyncError::transfer("x", "boom")),
        };
        assert!(err.to_string().contains("node1"));
    }
}
