//! Push statistics.

use std::time::Duration;

/// Summary of one push
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Files sent to the destination
    pub transferred_files: usize,

    /// Bytes sent to the destination
    pub transferred_bytes: u64,

    /// Files skipped because the destination already holds the same content
    pub unchanged_files: usize,

    /// Directories (or directory markers) created
    pub directories_created: usize,

    /// Stale remote objects removed
    pub deleted: usize,

    /// Stale remote objects that could not be removed
    pub delete_failures: usize,
}

impl PushReport {
    pub fn total_files(&self) -> usize {
        self.transferred_files + self.unchanged_files
    }

    pub fn merge(&mut self, other: &PushReport) {
        self.transferred_files += other.transferred_files;
        self.transferred_bytes += other.transferred_bytes;
        self.unchanged_files += other.unchanged_files;
        self.directories_created += other.directories_created;
        self.deleted += other.deleted;
        self.delete_failures += other.delete_failures;
    }

    pub fn log(&self, prefix: &str, elapsed: Duration) {
        tracing::info!(
            "{}: {} files transferred ({}), {} unchanged, {} directories created, {} removed, {}",
            prefix,
            self.transferred_files,
            format_bytes(self.transferred_bytes),
            self.unchanged_files,
            self.directories_created,
            self.deleted,
            format_duration(elapsed.as_secs())
        );
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
