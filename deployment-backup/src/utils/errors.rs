//! Error types for the backup orchestrator.
//!
//! Every run accumulates its failures in a [`RunErrors`] list. Each entry is
//! tagged with the step that produced it, and the tags decide whether the run
//! counts as fatal and which exit code the process reports.

use std::fmt;
use thiserror::Error;

/// Step classification of an orchestration failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Lock,
    Backup,
    Unlock,
    Cleanup,
    Generic,
}

impl ErrorKind {
    /// Exit code bit contributed by this kind.
    pub fn exit_bit(self) -> i32 {
        match self {
            ErrorKind::Lock => 4,
            ErrorKind::Unlock => 8,
            ErrorKind::Cleanup => 16,
            ErrorKind::Backup | ErrorKind::Generic => 1,
        }
    }
}

/// A single classified failure.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("{0:#}")]
    Lock(anyhow::Error),

    #[error("{0:#}")]
    Backup(anyhow::Error),

    #[error("{0:#}")]
    Unlock(anyhow::Error),

    #[error("{0:#}")]
    Cleanup(anyhow::Error),

    #[error("{0:#}")]
    Generic(anyhow::Error),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::Lock(_) => ErrorKind::Lock,
            OrchestratorError::Backup(_) => ErrorKind::Backup,
            OrchestratorError::Unlock(_) => ErrorKind::Unlock,
            OrchestratorError::Cleanup(_) => ErrorKind::Cleanup,
            OrchestratorError::Generic(_) => ErrorKind::Generic,
        }
    }

    /// The wrapped cause, without classification.
    pub fn source_error(&self) -> &anyhow::Error {
        match self {
            OrchestratorError::Lock(e)
            | OrchestratorError::Backup(e)
            | OrchestratorError::Unlock(e)
            | OrchestratorError::Cleanup(e)
            | OrchestratorError::Generic(e) => e,
        }
    }
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Generic(err)
    }
}

/// Ordered, append-only list of the errors raised during one run.
#[derive(Debug, Default)]
pub struct RunErrors(Vec<OrchestratorError>);

impl RunErrors {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// A list holding one unclassified error.
    pub fn generic(err: impl Into<anyhow::Error>) -> Self {
        Self(vec![OrchestratorError::Generic(err.into())])
    }

    pub fn push(&mut self, err: OrchestratorError) {
        self.0.push(err);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OrchestratorError> {
        self.0.iter()
    }

    pub fn kinds(&self) -> impl Iterator<Item = ErrorKind> + '_ {
        self.0.iter().map(OrchestratorError::kind)
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_empty()
    }

    /// True only for a run whose sole failure was cleanup.
    pub fn is_cleanup(&self) -> bool {
        self.0.len() == 1 && self.0[0].kind() == ErrorKind::Cleanup
    }

    /// True when the backup data is intact but unlock failed, possibly
    /// alongside cleanup failures.
    pub fn is_post_backup(&self) -> bool {
        let mut saw_unlock = false;
        for kind in self.kinds() {
            match kind {
                ErrorKind::Unlock => saw_unlock = true,
                ErrorKind::Cleanup => {}
                _ => return false,
            }
        }
        saw_unlock
    }

    pub fn is_fatal(&self) -> bool {
        !self.is_nil() && !self.is_cleanup() && !self.is_post_backup()
    }

    /// Numbered rendering of every error. With `with_trace` each entry uses
    /// the debug form of its cause, which carries the cause chain and a
    /// backtrace when one was captured.
    pub fn pretty_message(&self, with_trace: bool) -> String {
        if self.is_nil() {
            return String::new();
        }

        let plural = if self.0.len() == 1 { "" } else { "s" };
        let mut out = format!("{} error{} occurred:\n", self.0.len(), plural);
        for (index, err) in self.0.iter().enumerate() {
            out.push_str(&format!("error {}:\n", index + 1));
            if with_trace {
                out.push_str(&format!("{:?}\n", err.source_error()));
            } else {
                out.push_str(&format!("{}\n", err));
            }
        }
        out
    }
}

impl fmt::Display for RunErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pretty_message(false))
    }
}

impl std::error::Error for RunErrors {}

impl From<OrchestratorError> for RunErrors {
    fn from(err: OrchestratorError) -> Self {
        Self(vec![err])
    }
}

impl IntoIterator for RunErrors {
    type Item = OrchestratorError;
    type IntoIter = std::vec::IntoIter<OrchestratorError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Maps a finished run onto `(exit code, message, message with trace)`.
///
/// Each kind present sets its bit once, however often it occurs.
pub fn process_error(errors: &RunErrors) -> (i32, String, String) {
    let exit_code = errors.kinds().fold(0, |code, kind| code | kind.exit_bit());
    (
        exit_code,
        errors.pretty_message(false),
        errors.pretty_message(true),
    )
}

/// Collapses the failures of a fan-out into a single error, keeping their order.
pub fn join_errors(mut errors: Vec<anyhow::Error>) -> Option<anyhow::Error> {
    match errors.len() {
        0 => None,
        1 => errors.pop(),
        _ => {
            let joined = errors
                .iter()
                .map(|e| format!("{:#}", e))
                .collect::<Vec<_>>()
                .join("\n");
            Some(anyhow::anyhow!(joined))
        }
    }
}

/// Failures of the on-disk backup bundle.
#[derive(Error, Debug)]
pub enum BundleError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backup directory already exists: {0}")]
    AlreadyExists(String),

    #[error("Backup directory not found: {0}")]
    NotFound(String),

    #[error("No checksum recorded for artifact {0}")]
    MissingChecksum(String),
}

pub type Result<T> = std::result::Result<T, BundleError>;
