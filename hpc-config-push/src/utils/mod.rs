//! Utility modules shared by every backend.

pub mod errors;
pub mod logger;
pub mod shutdown;

pub use errors::{Result, SyncError};
