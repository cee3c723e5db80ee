//! Local filesystem helpers.

pub mod copy;
pub mod metadata;
pub mod walker;

pub use walker::{enumerate, FileEntry};
