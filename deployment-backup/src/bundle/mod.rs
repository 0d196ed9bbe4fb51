//! Local backup bundles.
//!
//! A bundle holds the artifacts of one run together with their checksums,
//! the run's start and finish times and the captured deployment manifest.

pub mod directory;
pub mod metadata;

use crate::checksum::BackupChecksum;
use crate::instance::{ArtifactIdentifier, Instance};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

pub use directory::{DirectoryBackup, DirectoryBackupManager};
pub use metadata::BackupMetadata;

/// Source of the timestamps recorded in a bundle.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The wall clock.
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// One bundle, opened for writing during backup or reading during restore.
#[async_trait]
pub trait Backup: Send + Sync {
    fn path(&self) -> &Path;

    async fn create_artifact(
        &self,
        id: &ArtifactIdentifier,
    ) -> anyhow::Result<Box<dyn AsyncWrite + Send + Unpin>>;

    async fn read_artifact(
        &self,
        id: &ArtifactIdentifier,
    ) -> anyhow::Result<Box<dyn AsyncRead + Send + Unpin>>;

    /// Checksum of the artifact as stored locally.
    async fn calculate_checksum(&self, id: &ArtifactIdentifier) -> anyhow::Result<BackupChecksum>;

    /// Checksum recorded for the artifact when it was backed up.
    async fn fetch_checksum(&self, id: &ArtifactIdentifier) -> anyhow::Result<BackupChecksum>;

    async fn add_checksum(
        &self,
        id: &ArtifactIdentifier,
        checksum: BackupChecksum,
    ) -> anyhow::Result<()>;

    async fn create_metadata_file_with_start_time(&self, time: DateTime<Utc>) -> anyhow::Result<()>;
    async fn add_finish_time(&self, time: DateTime<Utc>) -> anyhow::Result<()>;

    async fn save_manifest(&self, manifest: &str) -> anyhow::Result<()>;

    /// Whether the instances recorded in the bundle all exist in the
    /// live deployment.
    async fn deployment_matches(
        &self,
        deployment_name: &str,
        instances: &[Box<dyn Instance>],
    ) -> anyhow::Result<bool>;

    /// Whether every recorded artifact is present and intact.
    async fn valid(&self) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait BackupManager: Send + Sync {
    async fn create(&self, deployment_name: &str, clock: &Clock) -> anyhow::Result<Box<dyn Backup>>;
    async fn open(&self, path: &Path) -> anyhow::Result<Box<dyn Backup>>;
}
