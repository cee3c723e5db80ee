//! Local mirror backend: copies the environment into a directory.

use crate::config::LocalConfig;
use crate::environment::Environment;
use crate::fs::{copy, metadata};
use crate::orchestrator::{self, EnvEntry, ListGroup, PushStep, StepKind};
use crate::transfer::PushReport;
use crate::{Result, SyncError};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct LocalBackend {
    env: Arc<Environment>,
    settings: LocalConfig,
}

impl LocalBackend {
    pub fn new(env: Arc<Environment>, settings: LocalConfig) -> Self {
        Self { env, settings }
    }

    /// List environments under the destination root, sorted by name.
    pub fn list(&self) -> Result<Vec<ListGroup>> {
        let root = Path::new(&self.env.destination_root);
        info!("posix list: in {}", root.display());

        if !root.is_dir() {
            info!("posix list: no environment");
            return Ok(vec![ListGroup {
                hosts: Vec::new(),
                entries: Vec::new(),
            }]);
        }

        let mut entries = Vec::new();
        for child in fs::read_dir(root)? {
            let child = child?;
            let modified = child.metadata()?.modified()?;
            entries.push(EnvEntry::new(
                child.file_name().to_string_lossy(),
                metadata::format_mtime(modified),
            ));
        }
        entries.sort();

        let group = ListGroup {
            hosts: Vec::new(),
            entries,
        };
        info!("posix list: available environment:\n{}", group.report());
        Ok(vec![group])
    }

    /// Push the whole environment, then normalize permissions.
    pub fn upload(&self) -> Result<PushReport> {
        let destination = self.env.destination();
        if !destination.is_dir() {
            debug!("posix push: create destination dir {}", destination.display());
            fs::create_dir_all(&destination)?;
        }

        let mut report = PushReport::default();
        orchestrator::drive(&self.env, "posix push", &mut report, |step, report| {
            push_step(step, &destination, report)
        })?;

        metadata::apply_modes(&destination, self.settings.dir_mode, self.settings.file_mode)?;
        Ok(report)
    }

    pub fn download(&self) -> Result<()> {
        Err(SyncError::Unsupported("local"))
    }
}

fn push_step(step: &PushStep, destination: &Path, report: &mut PushReport) -> Result<()> {
    match step.kind {
        StepKind::PrivateFiles => {
            // Replaced wholesale so files removed upstream disappear
            let dir_files = destination.join(&step.destination);
            if dir_files.is_dir() {
                debug!("posix push: removing push private files dir {}", dir_files.display());
                fs::remove_dir_all(&dir_files)?;
            }
            if !step.source.exists() {
                return Err(SyncError::NotFound(step.source.clone()));
            }
            report.transferred_files += copy::copy_tree(&step.source, &dir_files)?;
        }
        _ => {
            let target_dir = destination.join(&step.destination);
            copy::copy_into(&step.source, &target_dir)?;
            report.transferred_files += 1;
            report.transferred_bytes += fs::metadata(&step.source)?.len();
        }
    }
    Ok(())
}
