//! Utility modules for the backup orchestrator.

pub mod errors;
pub mod logger;

pub use errors::{process_error, BundleError, ErrorKind, OrchestratorError, RunErrors};
