//! HPC Config Push Library
//!
//! Incremental synchronization of a configuration environment (per-area
//! archives plus a shared tree of configuration files) to a local mirror, a
//! pool of SFTP hosts or an object-storage bucket.

pub mod backend;
pub mod config;
pub mod environment;
pub mod fs;
pub mod orchestrator;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use backend::Backend;
pub use config::Config;
pub use environment::Environment;
pub use utils::errors::{Result, SyncError};
