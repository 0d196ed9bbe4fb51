//! Per-instance capabilities supplied by the transport layer.
//!
//! The orchestrator never talks to a VM directly. Everything it needs from
//! one is behind [`Instance`] and [`BackupArtifact`].

use crate::checksum::BackupChecksum;
use async_trait::async_trait;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};

/// Locates one artifact across the local bundle and the remote instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactIdentifier {
    pub instance_name: String,
    pub instance_index: String,
    pub name: String,
    pub has_custom_name: bool,
}

impl fmt::Display for ArtifactIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}", self.instance_name, self.instance_index, self.name)
    }
}

/// A restore script's demand for data produced under a custom artifact name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomArtifactRequirement {
    pub job: String,
    pub artifact: String,
}

/// One VM or process of a deployment.
#[async_trait]
pub trait Instance: Send + Sync {
    fn name(&self) -> &str;
    fn index(&self) -> &str;
    fn id(&self) -> &str;

    fn is_backupable(&self) -> bool;
    fn is_restorable(&self) -> bool;

    /// Where the instance's scripts put their artifacts on the remote machine.
    fn artifact_directory(&self) -> &str;

    async fn artifact_dir_exists(&self) -> anyhow::Result<bool>;

    /// Records that this run created the artifact directory, so cleanup
    /// knows it owns it.
    fn mark_artifact_dir_created(&self);

    async fn pre_backup_lock(&self) -> anyhow::Result<()>;
    async fn backup(&self) -> anyhow::Result<()>;
    async fn post_backup_unlock(&self) -> anyhow::Result<()>;
    async fn restore(&self) -> anyhow::Result<()>;
    async fn post_restore_unlock(&self) -> anyhow::Result<()>;

    /// Removes ephemeral state left by the current run.
    async fn cleanup(&self) -> anyhow::Result<()>;
    /// Removes state left by an earlier, interrupted run.
    async fn cleanup_previous(&self) -> anyhow::Result<()>;

    fn artifacts_to_backup(&self) -> Vec<Box<dyn BackupArtifact>>;
    fn artifacts_to_restore(&self) -> Vec<Box<dyn BackupArtifact>>;

    fn custom_backup_artifact_names(&self) -> Vec<String>;
    fn custom_restore_artifact_requirements(&self) -> Vec<CustomArtifactRequirement>;
}

/// One named unit of data living on a remote instance.
#[async_trait]
pub trait BackupArtifact: Send + Sync {
    fn identifier(&self) -> ArtifactIdentifier;

    /// Remote checksum of the artifact, keyed by logical file name.
    async fn checksum(&self) -> anyhow::Result<BackupChecksum>;

    async fn stream_from_remote(
        &self,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> anyhow::Result<u64>;

    async fn stream_to_remote(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> anyhow::Result<u64>;

    async fn delete(&self) -> anyhow::Result<()>;
}
