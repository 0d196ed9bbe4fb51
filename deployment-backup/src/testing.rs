//! In-memory collaborators for unit tests.

use crate::bundle::{Backup, BackupManager, Clock, DirectoryBackup};
use crate::checksum::{sha256_hex, BackupChecksum};
use crate::deployment::{Deployment, DeploymentManager, InstanceDeployment};
use crate::instance::{ArtifactIdentifier, BackupArtifact, CustomArtifactRequirement, Instance};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Call counters shared between a [`FakeInstance`] and the test body.
#[derive(Debug, Default)]
pub struct InstanceCalls {
    pub lock: AtomicUsize,
    pub backup: AtomicUsize,
    pub unlock: AtomicUsize,
    pub restore: AtomicUsize,
    pub restore_unlock: AtomicUsize,
    pub cleanup: AtomicUsize,
    pub cleanup_previous: AtomicUsize,
    pub artifact_dir_created: AtomicBool,
}

#[derive(Default)]
struct Failures {
    lock: bool,
    backup: bool,
    unlock: bool,
    restore: bool,
    restore_unlock: bool,
    cleanup: bool,
    cleanup_previous: bool,
}

pub struct FakeInstance {
    name: String,
    index: String,
    id: String,
    backupable: bool,
    restorable: bool,
    artifact_dir_exists: bool,
    custom_backup_names: Vec<String>,
    restore_requirements: Vec<CustomArtifactRequirement>,
    backup_artifacts: Vec<FakeArtifact>,
    restore_artifacts: Vec<FakeArtifact>,
    failures: Failures,
    calls: Arc<InstanceCalls>,
}

impl FakeInstance {
    pub fn new(name: &str, index: &str) -> Self {
        Self {
            name: name.to_string(),
            index: index.to_string(),
            id: format!("{}-{}", name, index),
            backupable: false,
            restorable: false,
            artifact_dir_exists: false,
            custom_backup_names: Vec::new(),
            restore_requirements: Vec::new(),
            backup_artifacts: Vec::new(),
            restore_artifacts: Vec::new(),
            failures: Failures::default(),
            calls: Arc::new(InstanceCalls::default()),
        }
    }

    pub fn calls(&self) -> Arc<InstanceCalls> {
        Arc::clone(&self.calls)
    }

    pub fn backupable(mut self) -> Self {
        self.backupable = true;
        self
    }

    pub fn restorable(mut self) -> Self {
        self.restorable = true;
        self
    }

    pub fn with_existing_artifact_dir(mut self) -> Self {
        self.artifact_dir_exists = true;
        self
    }

    pub fn with_custom_backup_names(mut self, names: &[&str]) -> Self {
        self.custom_backup_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_restore_requirement(mut self, job: &str, artifact: &str) -> Self {
        self.restore_requirements.push(CustomArtifactRequirement {
            job: job.to_string(),
            artifact: artifact.to_string(),
        });
        self
    }

    pub fn with_backup_artifact(mut self, artifact: FakeArtifact) -> Self {
        self.backup_artifacts.push(artifact);
        self
    }

    pub fn with_restore_artifact(mut self, artifact: FakeArtifact) -> Self {
        self.restore_artifacts.push(artifact);
        self
    }

    pub fn failing_lock(mut self) -> Self {
        self.failures.lock = true;
        self
    }

    pub fn failing_backup(mut self) -> Self {
        self.failures.backup = true;
        self
    }

    pub fn failing_unlock(mut self) -> Self {
        self.failures.unlock = true;
        self
    }

    pub fn failing_restore(mut self) -> Self {
        self.failures.restore = true;
        self
    }

    pub fn failing_restore_unlock(mut self) -> Self {
        self.failures.restore_unlock = true;
        self
    }

    pub fn failing_cleanup(mut self) -> Self {
        self.failures.cleanup = true;
        self
    }

    pub fn failing_cleanup_previous(mut self) -> Self {
        self.failures.cleanup_previous = true;
        self
    }

    fn record(&self, counter: &AtomicUsize, fail: bool, op: &str) -> anyhow::Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        if fail {
            anyhow::bail!("{} failed", op);
        }
        Ok(())
    }
}

#[async_trait]
impl Instance for FakeInstance {
    fn name(&self) -> &str {
        &self.name
    }

    fn index(&self) -> &str {
        &self.index
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn is_backupable(&self) -> bool {
        self.backupable
    }

    fn is_restorable(&self) -> bool {
        self.restorable
    }

    fn artifact_directory(&self) -> &str {
        "/var/backup-artifacts"
    }

    async fn artifact_dir_exists(&self) -> anyhow::Result<bool> {
        Ok(self.artifact_dir_exists)
    }

    fn mark_artifact_dir_created(&self) {
        self.calls.artifact_dir_created.store(true, Ordering::SeqCst);
    }


    async fn pre_backup_lock(&self) -> anyhow::Result<()> {
        self.record(&self.calls.lock, self.failures.lock, "lock")
    }

    async fn backup(&self) -> anyhow::Result<()> {
        self.record(&self.calls.backup, self.failures.backup, "backup")
    }

    async fn post_backup_unlock(&self) -> anyhow::Result<()> {
        self.record(&self.calls.unlock, self.failures.unlock, "unlock")
    }

    async fn restore(&self) -> anyhow::Result<()> {
        self.record(&self.calls.restore, self.failures.restore, "restore")
    }

    async fn post_restore_unlock(&self) -> anyhow::Result<()> {
        self.record(
            &self.calls.restore_unlock,
            self.failures.restore_unlock,
            "restore unlock",
        )
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        self.record(&self.calls.cleanup, self.failures.cleanup, "cleanup")
    }

    async fn cleanup_previous(&self) -> anyhow::Result<()> {
        self.record(
            &self.calls.cleanup_previous,
            self.failures.cleanup_previous,
            "cleanup previous",
        )
    }

    fn artifacts_to_backup(&self) -> Vec<Box<dyn BackupArtifact>> {
        self.backup_artifacts
            .iter()
            .map(|a| Box::new(a.clone()) as Box<dyn BackupArtifact>)
            .collect()
    }

    fn artifacts_to_restore(&self) -> Vec<Box<dyn BackupArtifact>> {
        self.restore_artifacts
            .iter()
            .map(|a| Box::new(a.clone()) as Box<dyn BackupArtifact>)
            .collect()
    }

    fn custom_backup_artifact_names(&self) -> Vec<String> {
        self.custom_backup_names.clone()
    }

    fn custom_restore_artifact_requirements(&self) -> Vec<CustomArtifactRequirement> {
        self.restore_requirements.clone()
    }
}

/// Artifact whose remote side is a byte buffer.
#[derive(Clone)]
pub struct FakeArtifact {
    id: ArtifactIdentifier,
    payload: Vec<u8>,
    received: Arc<Mutex<Vec<u8>>>,
    deleted: Arc<AtomicBool>,
    bad_checksum: bool,
}

impl FakeArtifact {
    pub fn new(instance: &str, index: &str, name: &str, payload: &[u8]) -> Self {
        Self {
            id: ArtifactIdentifier {
                instance_name: instance.to_string(),
                instance_index: index.to_string(),
                name: name.to_string(),
                has_custom_name: false,
            },
            payload: payload.to_vec(),
            received: Arc::new(Mutex::new(Vec::new())),
            deleted: Arc::new(AtomicBool::new(false)),
            bad_checksum: false,
        }
    }

    pub fn with_custom_name(mut self) -> Self {
        self.id.has_custom_name = true;
        self
    }

    pub fn with_bad_checksum(mut self) -> Self {
        self.bad_checksum = true;
        self
    }

    pub fn deleted(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.deleted)
    }

    pub fn received(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.received)
    }
}

#[async_trait]
impl BackupArtifact for FakeArtifact {
    fn identifier(&self) -> ArtifactIdentifier {
        self.id.clone()
    }

    async fn checksum(&self) -> anyhow::Result<BackupChecksum> {
        let digest = if self.bad_checksum {
            "not-a-digest".to_string()
        } else {
            let received = self.received.lock().unwrap();
            if received.is_empty() {
                sha256_hex(&self.payload)
            } else {
                sha256_hex(&received)
            }
        };

        let mut checksum = BackupChecksum::new();
        checksum.insert(DirectoryBackup::artifact_file_name(&self.id), digest);
        Ok(checksum)
    }

    async fn stream_from_remote(
        &self,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> anyhow::Result<u64> {
        writer.write_all(&self.payload).await?;
        Ok(self.payload.len() as u64)
    }

    async fn stream_to_remote(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> anyhow::Result<u64> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        let len = buf.len() as u64;
        *self.received.lock().unwrap() = buf;
        Ok(len)
    }

    async fn delete(&self) -> anyhow::Result<()> {
        self.deleted.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out one prepared deployment and counts lookups.
pub struct FakeDeploymentManager {
    deployment: Mutex<Option<InstanceDeployment>>,
    manifest: String,
    failing_save_manifest: bool,
    pub find_calls: AtomicUsize,
}

impl FakeDeploymentManager {
    pub fn new(instances: Vec<FakeInstance>) -> Self {
        let instances = instances
            .into_iter()
            .map(|i| Box::new(i) as Box<dyn Instance>)
            .collect();
        Self {
            deployment: Mutex::new(Some(InstanceDeployment::new(instances))),
            manifest: "name: redis\n".to_string(),
            failing_save_manifest: false,
            find_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_save_manifest(mut self) -> Self {
        self.failing_save_manifest = true;
        self
    }

    /// A manager that knows no deployments.
    pub fn empty() -> Self {
        Self {
            deployment: Mutex::new(None),
            manifest: String::new(),
            failing_save_manifest: false,
            find_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DeploymentManager for FakeDeploymentManager {
    async fn find(&self, deployment_name: &str) -> anyhow::Result<Box<dyn Deployment>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        let deployment = self.deployment.lock().unwrap().take();
        match deployment {
            Some(d) => Ok(Box::new(d)),
            None => anyhow::bail!("Deployment '{}' not found", deployment_name),
        }
    }

    async fn save_manifest(&self, deployment_name: &str, backup: &dyn Backup) -> anyhow::Result<()> {
        if self.failing_save_manifest {
            anyhow::bail!("Unable to download manifest of '{}'", deployment_name);
        }
        backup.save_manifest(&self.manifest).await
    }
}

/// Opens [`FakeBackup`]s. Creating bundles is not supported.
#[derive(Default)]
pub struct FakeBackupManager {
    failing_topology_check: bool,
}

impl FakeBackupManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opened bundles fail to compare themselves with a deployment.
    pub fn failing_topology_check(mut self) -> Self {
        self.failing_topology_check = true;
        self
    }
}

#[async_trait]
impl BackupManager for FakeBackupManager {
    async fn create(&self, deployment_name: &str, _clock: &Clock) -> anyhow::Result<Box<dyn Backup>> {
        anyhow::bail!("FakeBackupManager cannot create a bundle for '{}'", deployment_name)
    }

    async fn open(&self, path: &Path) -> anyhow::Result<Box<dyn Backup>> {
        Ok(Box::new(FakeBackup {
            path: path.to_path_buf(),
            failing_topology_check: self.failing_topology_check,
        }))
    }
}

/// A bundle that is always valid and holds no artifacts.
pub struct FakeBackup {
    path: PathBuf,
    failing_topology_check: bool,
}

#[async_trait]
impl Backup for FakeBackup {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn create_artifact(
        &self,
        id: &ArtifactIdentifier,
    ) -> anyhow::Result<Box<dyn AsyncWrite + Send + Unpin>> {
        anyhow::bail!("no artifact {} in fake bundle", id)
    }

    async fn read_artifact(
        &self,
        id: &ArtifactIdentifier,
    ) -> anyhow::Result<Box<dyn AsyncRead + Send + Unpin>> {
        anyhow::bail!("no artifact {} in fake bundle", id)
    }

    async fn calculate_checksum(&self, id: &ArtifactIdentifier) -> anyhow::Result<BackupChecksum> {
        anyhow::bail!("no artifact {} in fake bundle", id)
    }

    async fn fetch_checksum(&self, id: &ArtifactIdentifier) -> anyhow::Result<BackupChecksum> {
        anyhow::bail!("no artifact {} in fake bundle", id)
    }

    async fn add_checksum(
        &self,
        _id: &ArtifactIdentifier,
        _checksum: BackupChecksum,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn create_metadata_file_with_start_time(&self, _time: DateTime<Utc>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn add_finish_time(&self, _time: DateTime<Utc>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn save_manifest(&self, _manifest: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn deployment_matches(
        &self,
        _deployment_name: &str,
        _instances: &[Box<dyn Instance>],
    ) -> anyhow::Result<bool> {
        if self.failing_topology_check {
            anyhow::bail!("metadata.json is unreadable");
        }
        Ok(true)
    }

    async fn valid(&self) -> anyhow::Result<bool> {
        Ok(true)
    }
}
