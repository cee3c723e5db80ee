//! File metadata helpers: deterministic permissions and listing timestamps.

use crate::Result;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Timestamp format used by every `list` report
pub const LIST_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a modification time as `YYYY-MM-DD HH:MM:SS` (UTC).
pub fn format_mtime(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format(LIST_TIME_FORMAT).to_string()
}

/// Format seconds since the Unix epoch the same way as [`format_mtime`].
pub fn format_epoch(secs: u64) -> String {
    format_mtime(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
}

/// Set `dir_mode` on every directory and `file_mode` on every file below
/// `root` (the root itself is left as is).
#[cfg(unix)]
pub fn apply_modes(root: &Path, dir_mode: u32, file_mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    use walkdir::WalkDir;

    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry?;
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            continue;
        }
        let mode = if file_type.is_dir() { dir_mode } else { file_mode };
        std::fs::set_permissions(entry.path(), std::fs::Permissions::from_mode(mode))?;
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn apply_modes(_root: &Path, _dir_mode: u32, _file_mode: u32) -> Result<()> {
    // Unix permission bits have no equivalent here
    Ok(())
}
