//! Deployment Backup Library
//!
//! Coordinates lock, backup, transfer, unlock and cleanup across the
//! instances of a deployment, and restores a bundle back onto them.

pub mod backuper;
pub mod bundle;
pub mod checksum;
pub mod cleaner;
pub mod config;
pub mod deployment;
pub mod instance;
pub mod restorer;
pub mod utils;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use backuper::Backuper;
pub use cleaner::Cleaner;
pub use config::Config;
pub use restorer::Restorer;
pub use utils::errors::{BundleError, ErrorKind, OrchestratorError, RunErrors};
pub type Result<T> = std::result::Result<T, BundleError>;
