//! Source tree enumeration.
//!
//! Produces the relative paths to transfer under a source root. Symbolic
//! links are followed, so files inside a symlinked subdirectory are reported
//! under the link's path, not under the real path of its target.

use crate::{Result, SyncError};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// A file discovered under a source root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the source root, `/` separated, no leading separator
    pub relative_path: String,

    /// Absolute (or root-relative) path to read the content from
    pub source: PathBuf,
}

impl FileEntry {
    /// Destination of this entry below `destination`, as a `/` separated string.
    pub fn destination_key(&self, destination: &str) -> String {
        crate::environment::join_key(destination, &self.relative_path)
    }

    /// Destination of this entry below a filesystem directory.
    pub fn destination_path(&self, destination: &Path) -> PathBuf {
        destination.join(&self.relative_path)
    }
}

/// List every file to transfer under `source_root`.
///
/// A single file yields exactly one entry named after the file. A directory
/// yields every file reachable by a recursive walk that follows links, sorted
/// by path. A missing root is `SyncError::NotFound`; any other error (including
/// permission errors) is returned as is.
pub fn enumerate(source_root: &Path) -> Result<Vec<FileEntry>> {
    let metadata = match std::fs::metadata(source_root) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SyncError::NotFound(source_root.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    if !metadata.is_dir() {
        let name = source_root
            .file_name()
            .ok_or_else(|| SyncError::NotFound(source_root.to_path_buf()))?;
        return Ok(vec![FileEntry {
            relative_path: name.to_string_lossy().into_owned(),
            source: source_root.to_path_buf(),
        }]);
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(source_root)
        .follow_links(true)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry?;

        // With follow_links the file type is the one of the link target
        if entry.file_type().is_dir() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(source_root)
            .unwrap_or(entry.path());
        files.push(FileEntry {
            relative_path: to_slash(relative),
            source: entry.path().to_path_buf(),
        });
    }

    tracing::debug!("Enumerated {} files under {}", files.len(), source_root.display());
    Ok(files)
}

fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn relative_paths(entries: &[FileEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.relative_path.as_str()).collect()
    }

    #[test]
    fn test_enumerate_single_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let file = temp_dir.path().join("puppet.conf");
        fs::write(&file, b"[main]")?;

        let files = enumerate(&file)?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "puppet.conf");
        assert_eq!(files[0].source, file);
        Ok(())
    }

    #[test]
    fn test_enumerate_empty_directory() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let files = enumerate(temp_dir.path())?;
        assert!(files.is_empty());
        Ok(())
    }

    #[test]
    fn test_enumerate_nested() -> Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir_all(temp_dir.path().join("a/b"))?;
        fs::write(temp_dir.path().join("top.txt"), b"1")?;
        fs::write(temp_dir.path().join("a/mid.txt"), b"2")?;
        fs::write(temp_dir.path().join("a/b/deep.txt"), b"3")?;

        let files = enumerate(temp_dir.path())?;
        assert_eq!(relative_paths(&files), vec!["a/b/deep.txt", "a/mid.txt", "top.txt"]);
        assert_eq!(files[0].source, temp_dir.path().join("a/b/deep.txt"));
        Ok(())
    }

    #[test]
    fn test_enumerate_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let err = enumerate(&temp_dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[test]
    #[cfg(unix)]
    fn test_enumerate_follows_symlinked_directory() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let target = temp_dir.path().join("real");
        fs::create_dir_all(&target)?;
        fs::write(target.join("inner.txt"), b"x")?;

        let source = temp_dir.path().join("source");
        fs::create_dir_all(&source)?;
        std::os::unix::fs::symlink(&target, source.join("linked"))?;

        let files = enumerate(&source)?;
        assert_eq!(relative_paths(&files), vec!["linked/inner.txt"]);
        assert_eq!(files[0].source, source.join("linked/inner.txt"));
        Ok(())
    }

    #[test]
    fn test_destination_key() {
        let entry = FileEntry {
            relative_path: "a/b.txt".into(),
            source: PathBuf::from("/src/a/b.txt"),
        };
        assert_eq!(entry.destination_key("root/prod/files"), "root/prod/files/a/b.txt");
        assert_eq!(
            entry.destination_path(Path::new("/dest")),
            PathBuf::from("/dest/a/b.txt")
        );
    }
}
