//! The environment descriptor handed to the synchronization engine.
//!
//! An environment is built from configuration by the caller and stays
//! read-only for the whole run.

use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Extension of the per-area archives produced by the packaging step.
pub const ARCHIVE_EXTENSION: &str = "tar.xz";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    /// Environment name, used as the destination subdirectory
    pub name: String,

    /// Ordered area names
    pub areas: Vec<String>,

    /// Directory holding one subdirectory of archives per area
    pub archives_dir: PathBuf,

    /// Private files tree, pushed as `files/`
    pub files_private: PathBuf,

    /// Puppet configuration file
    pub conf_puppet: PathBuf,

    /// Hiera configuration file
    pub conf_hiera: PathBuf,

    /// Private cluster nodes description
    pub nodes_private: PathBuf,

    /// Destination root: a directory path, or a key prefix on object storage
    pub destination_root: String,

    /// Bucket name (object storage only)
    #[serde(default)]
    pub bucket: Option<String>,
}

/// An area resolved against its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Area<'a> {
    pub name: &'a str,
    pub archive: PathBuf,
}

impl Environment {
    /// Archive of an area: `<archives_dir>/<area>/<environment>.tar.xz`
    pub fn archive_path(&self, area: &str) -> PathBuf {
        self.archives_dir
            .join(area)
            .join(format!("{}.{}", self.name, ARCHIVE_EXTENSION))
    }

    /// Areas in configured order, each with its archive path.
    pub fn areas(&self) -> impl Iterator<Item = Area<'_>> {
        self.areas.iter().map(move |name| Area {
            name,
            archive: self.archive_path(name),
        })
    }

    /// Filesystem destination: `<destination_root>/<name>`
    pub fn destination(&self) -> PathBuf {
        Path::new(&self.destination_root).join(&self.name)
    }

    /// Object-store prefix of all environments, without surrounding `/`.
    pub fn root_key(&self) -> &str {
        self.destination_root.trim_matches('/')
    }

    /// Object-store key of this environment, without surrounding `/`.
    pub fn destination_key(&self) -> String {
        join_key(self.root_key(), &self.name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.contains('/') || self.name == "." || self.name == ".." {
            return Err(SyncError::Config(format!(
                "invalid environment name '{}'",
                self.name
            )));
        }
        if self.destination_root.is_empty() {
            return Err(SyncError::Config("destination_root must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for area in &self.areas {
            if area.is_empty() || area.contains('/') {
                return Err(SyncError::Config(format!("invalid area name '{}'", area)));
            }
            if !seen.insert(area.as_str()) {
                return Err(SyncError::Config(format!("duplicate area '{}'", area)));
            }
        }
        Ok(())
    }
}

/// Join two object-store key fragments with a single `/`, ignoring empty ones.
pub fn join_key(base: &str, rest: &str) -> String {
    let base = base.trim_end_matches('/');
    let rest = rest.trim_start_matches('/');
    match (base.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{}/{}", base, rest),
    }
}
