//! Transfer machinery shared by the backends.

pub mod fingerprint;
pub mod pool;
pub mod progress;

pub use pool::TaskPool;
pub use progress::PushReport;
