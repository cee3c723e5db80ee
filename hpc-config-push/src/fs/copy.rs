//! Directory-aware tree copy.
//!
//! A plain file copy resolves symlinks before copying and fails when a link
//! points at a directory. The copy here follows links and recurses into
//! linked directories instead, so the destination receives real files.

use crate::Result;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Copy `source` into `destination`, creating `destination` and every
/// directory below it. Returns the number of files copied.
pub fn copy_tree(source: &Path, destination: &Path) -> Result<usize> {
    let mut copied = 0;

    for entry in WalkDir::new(source).follow_links(true).sort_by_file_name() {
        let entry = entry?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let target = destination.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    tracing::debug!(
        "Copied {} files from {} to {}",
        copied,
        source.display(),
        destination.display()
    );
    Ok(copied)
}

/// Copy one file into `directory`, keeping its file name.
pub fn copy_into(file: &Path, directory: &Path) -> Result<()> {
    let name = file
        .file_name()
        .ok_or_else(|| crate::SyncError::NotFound(file.to_path_buf()))?;
    fs::create_dir_all(directory)?;
    fs::copy(file, directory.join(name))?;
    Ok(())
}
