//! Bundles stored as a plain directory.
//!
//! Layout of `<root>/<deployment>_<YYYYMMDDTHHMMSSZ>/`:
//! - `<instance>-<index>-<artifact>.tar` per artifact, or `<artifact>.tar`
//!   when the artifact has a custom name
//! - `metadata.json` with checksums and the backup activity times
//! - `manifest.yml` with the deployment manifest captured at backup time

use super::metadata::BackupMetadata;
use super::{Backup, BackupManager, Clock};
use crate::checksum::{sha256_file, BackupChecksum};
use crate::instance::{ArtifactIdentifier, Instance};
use crate::utils::errors::{BundleError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

const METADATA_FILE: &str = "metadata.json";
const MANIFEST_FILE: &str = "manifest.yml";

/// Creates and opens bundles below a root directory.
#[derive(Debug, Clone)]
pub struct DirectoryBackupManager {
    root: PathBuf,
}

impl DirectoryBackupManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn create_directory(
        &self,
        deployment_name: &str,
        clock: &Clock,
    ) -> Result<DirectoryBackup> {
        let timestamp = clock().format("%Y%m%dT%H%M%SZ");
        let path = self.root.join(format!("{}_{}", deployment_name, timestamp));

        tokio::fs::create_dir_all(&self.root).await?;
        match tokio::fs::create_dir(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(BundleError::AlreadyExists(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        info!(path = %path.display(), "Created backup directory");
        Ok(DirectoryBackup { path })
    }

    pub async fn open_directory(&self, path: &Path) -> Result<DirectoryBackup> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => Ok(DirectoryBackup {
                path: path.to_path_buf(),
            }),
            Ok(_) => Err(BundleError::NotFound(path.display().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BundleError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl BackupManager for DirectoryBackupManager {
    async fn create(&self, deployment_name: &str, clock: &Clock) -> anyhow::Result<Box<dyn Backup>> {
        Ok(Box::new(self.create_directory(deployment_name, clock).await?))
    }

    async fn open(&self, path: &Path) -> anyhow::Result<Box<dyn Backup>> {
        Ok(Box::new(self.open_directory(path).await?))
    }
}

/// A bundle directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct DirectoryBackup {
    path: PathBuf,
}

impl DirectoryBackup {
    pub fn artifact_file_name(id: &ArtifactIdentifier) -> String {
        if id.has_custom_name {
            format!("{}.tar", id.name)
        } else {
            format!("{}-{}-{}.tar", id.instance_name, id.instance_index, id.name)
        }
    }

    fn artifact_path(&self, id: &ArtifactIdentifier) -> PathBuf {
        self.path.join(Self::artifact_file_name(id))
    }

    fn metadata_path(&self) -> PathBuf {
        self.path.join(METADATA_FILE)
    }

    pub async fn metadata(&self) -> Result<BackupMetadata> {
        let content = tokio::fs::read_to_string(self.metadata_path()).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn write_metadata(&self, metadata: &BackupMetadata) -> Result<()> {
        let content = serde_json::to_string_pretty(metadata)?;
        tokio::fs::write(self.metadata_path(), content).await?;
        Ok(())
    }

    async fn local_checksum(&self, id: &ArtifactIdentifier) -> Result<BackupChecksum> {
        let digest = sha256_file(&self.artifact_path(id)).await?;
        let mut checksum = BackupChecksum::new();
        checksum.insert(Self::artifact_file_name(id), digest);
        Ok(checksum)
    }
}

#[async_trait]
impl Backup for DirectoryBackup {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn create_artifact(
        &self,
        id: &ArtifactIdentifier,
    ) -> anyhow::Result<Box<dyn AsyncWrite + Send + Unpin>> {
        let path = self.artifact_path(id);
        debug!(path = %path.display(), "Creating local artifact file");
        let file = tokio::fs::File::create(&path)
            .await
            .map_err(BundleError::from)?;
        Ok(Box::new(file))
    }

    async fn read_artifact(
        &self,
        id: &ArtifactIdentifier,
    ) -> anyhow::Result<Box<dyn AsyncRead + Send + Unpin>> {
        let file = tokio::fs::File::open(self.artifact_path(id))
            .await
            .map_err(BundleError::from)?;
        Ok(Box::new(file))
    }

    async fn calculate_checksum(&self, id: &ArtifactIdentifier) -> anyhow::Result<BackupChecksum> {
        Ok(self.local_checksum(id).await?)
    }

    async fn fetch_checksum(&self, id: &ArtifactIdentifier) -> anyhow::Result<BackupChecksum> {
        let metadata = self.metadata().await?;
        let checksum = metadata
            .checksum_for(id)
            .cloned()
            .ok_or_else(|| BundleError::MissingChecksum(id.to_string()))?;
        Ok(checksum)
    }

    async fn add_checksum(
        &self,
        id: &ArtifactIdentifier,
        checksum: BackupChecksum,
    ) -> anyhow::Result<()> {
        let mut metadata = self.metadata().await?;
        metadata.add_checksum(id, checksum);
        self.write_metadata(&metadata).await?;
        Ok(())
    }

    async fn create_metadata_file_with_start_time(&self, time: DateTime<Utc>) -> anyhow::Result<()> {
        self.write_metadata(&BackupMetadata::with_start_time(time))
            .await?;
        Ok(())
    }

    async fn add_finish_time(&self, time: DateTime<Utc>) -> anyhow::Result<()> {
        let mut metadata = self.metadata().await?;
        metadata.backup_activity.finish_time = Some(time);
        self.write_metadata(&metadata).await?;
        Ok(())
    }

    async fn save_manifest(&self, manifest: &str) -> anyhow::Result<()> {
        tokio::fs::write(self.path.join(MANIFEST_FILE), manifest)
            .await
            .map_err(BundleError::from)?;
        Ok(())
    }

    async fn deployment_matches(
        &self,
        deployment_name: &str,
        instances: &[Box<dyn Instance>],
    ) -> anyhow::Result<bool> {
        let metadata = self.metadata().await?;

        for recorded in &metadata.instances {
            let present = instances
                .iter()
                .any(|i| i.name() == recorded.name && i.index() == recorded.index);
            if !present {
                info!(
                    deployment = %deployment_name,
                    instance = %format!("{}/{}", recorded.name, recorded.index),
                    "Backup contains an instance the deployment does not have"
                );
                return Ok(false);
            }
        }

        Ok(true)
    }

    async fn valid(&self) -> anyhow::Result<bool> {
        let metadata = self.metadata().await?;

        for (id, recorded) in metadata.artifacts() {
            let actual = match self.local_checksum(&id).await {
                Ok(checksum) => checksum,
                Err(e) => {
                    warn!(artifact = %Self::artifact_file_name(&id), "Cannot read artifact: {}", e);
                    return Ok(false);
                }
            };

            if !actual.matches(recorded) {
                warn!(
                    artifact = %Self::artifact_file_name(&id),
                    recorded = %recorded,
                    actual = %actual,
                    "Artifact checksum does not match metadata"
                );
                return Ok(false);
            }
        }

        Ok(true)
    }
}
