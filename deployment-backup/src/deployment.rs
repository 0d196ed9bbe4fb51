//! Deployments and the operations that span all of their instances.
//!
//! Lock, unlock and cleanup must reach every instance, so they run with
//! bounded parallelism and report every failure. Backup, restore and the
//! artifact copies stop at the first failure and never run in parallel.

use crate::bundle::Backup;
use crate::config::OrchestratorConfig;
use crate::instance::{BackupArtifact, Instance};
use crate::utils::errors::join_errors;
use anyhow::Context;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, StreamExt};
use std::collections::HashSet;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

/// Resolves deployments by name.
#[async_trait]
pub trait DeploymentManager: Send + Sync {
    async fn find(&self, deployment_name: &str) -> anyhow::Result<Box<dyn Deployment>>;

    /// Stores the deployment's manifest text in the bundle.
    async fn save_manifest(&self, deployment_name: &str, backup: &dyn Backup) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Deployment: Send + Sync {
    fn instances(&self) -> &[Box<dyn Instance>];

    fn is_backupable(&self) -> bool;
    fn is_restorable(&self) -> bool;
    fn has_unique_custom_artifact_names(&self) -> bool;

    async fn check_artifact_dir(&self) -> anyhow::Result<()>;
    fn custom_artifact_names_match(&self) -> anyhow::Result<()>;

    async fn pre_backup_lock(&self) -> anyhow::Result<()>;
    async fn backup(&self) -> anyhow::Result<()>;
    async fn post_backup_unlock(&self) -> anyhow::Result<()>;
    async fn restore(&self) -> anyhow::Result<()>;
    async fn post_restore_unlock(&self) -> anyhow::Result<()>;

    async fn copy_remote_backup_to_local(&self, backup: &dyn Backup) -> anyhow::Result<()>;
    async fn copy_local_backup_to_remote(&self, backup: &dyn Backup) -> anyhow::Result<()>;

    async fn cleanup(&self) -> anyhow::Result<()>;
    async fn cleanup_previous(&self) -> anyhow::Result<()>;
}

/// A deployment backed by a list of instances.
pub struct InstanceDeployment {
    instances: Vec<Box<dyn Instance>>,
    max_concurrent_instances: usize,
}

impl InstanceDeployment {
    pub fn new(instances: Vec<Box<dyn Instance>>) -> Self {
        Self {
            instances,
            max_concurrent_instances: 1,
        }
    }

    /// Builds a deployment whose fan-out width comes from `[orchestrator]`.
    pub fn from_config(instances: Vec<Box<dyn Instance>>, config: &OrchestratorConfig) -> Self {
        Self::new(instances).with_concurrency(config.max_concurrent_instances)
    }

    pub fn with_concurrency(mut self, max_concurrent_instances: usize) -> Self {
        self.max_concurrent_instances = max_concurrent_instances.max(1);
        self
    }

    fn backupable(&self) -> impl Iterator<Item = &dyn Instance> {
        self.instances
            .iter()
            .map(|i| i.as_ref())
            .filter(|i| i.is_backupable())
    }

    fn restorable(&self) -> impl Iterator<Item = &dyn Instance> {
        self.instances
            .iter()
            .map(|i| i.as_ref())
            .filter(|i| i.is_restorable())
    }

    /// Runs `op` on every instance and joins the failures in instance order.
    async fn fan_out<'a, I, F>(&'a self, instances: I, op: F) -> anyhow::Result<()>
    where
        I: Iterator<Item = &'a dyn Instance> + Send,
        F: Fn(&'a dyn Instance) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync,
    {
        let futures: Vec<BoxFuture<'a, anyhow::Result<()>>> = instances
            .map(|instance: &'a dyn Instance| -> BoxFuture<'a, anyhow::Result<()>> {
                let fut = op(instance);
                Box::pin(async move {
                    fut.await
                        .with_context(|| format!("{}/{}", instance.name(), instance.id()))
                })
            })
            .collect();
        let failures: Vec<anyhow::Error> = stream::iter(futures)
            .buffered(self.max_concurrent_instances)
            .filter_map(|result| async move { result.err() })
            .collect()
            .await;

        match join_errors(failures) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn copy_remote_artifact_to_local(
        &self,
        backup: &dyn Backup,
        instance: &dyn Instance,
        artifact: &dyn BackupArtifact,
    ) -> anyhow::Result<()> {
        let id = artifact.identifier();
        info!(
            instance = %format!("{}/{}", instance.name(), instance.id()),
            artifact = %id.name,
            "Copying backup from instance"
        );

        let mut writer = backup.create_artifact(&id).await?;
        let bytes = artifact.stream_from_remote(writer.as_mut()).await?;
        writer.shutdown().await?;
        drop(writer);

        let local_checksum = backup.calculate_checksum(&id).await?;
        let remote_checksum = artifact.checksum().await?;
        if !local_checksum.matches(&remote_checksum) {
            error!(artifact = %id, "Checksum mismatch after copying from instance");
            anyhow::bail!(
                "Backup is corrupted, checksum failed for {}/{} {}, remote checksum: {}, local checksum: {}",
                instance.name(),
                instance.id(),
                id.name,
                remote_checksum,
                local_checksum
            );
        }

        backup.add_checksum(&id, local_checksum).await?;
        artifact.delete().await?;

        info!(artifact = %id, bytes, "Finished copying backup from instance");
        Ok(())
    }

    async fn copy_local_artifact_to_remote(
        &self,
        backup: &dyn Backup,
        instance: &dyn Instance,
        artifact: &dyn BackupArtifact,
    ) -> anyhow::Result<()> {
        let id = artifact.identifier();
        info!(
            instance = %format!("{}/{}", instance.name(), instance.id()),
            artifact = %id.name,
            "Copying backup to instance"
        );

        let mut reader = backup.read_artifact(&id).await?;
        let bytes = artifact.stream_to_remote(reader.as_mut()).await?;
        drop(reader);

        let local_checksum = backup.fetch_checksum(&id).await?;
        let remote_checksum = artifact.checksum().await?;
        if !local_checksum.matches(&remote_checksum) {
            error!(artifact = %id, "Checksum mismatch after copying to instance");
            anyhow::bail!(
                "Backup couldn't be transferred, checksum failed for {}/{} {}, remote checksum: {}, local checksum: {}",
                instance.name(),
                instance.id(),
                id.name,
                remote_checksum,
                local_checksum
            );
        }

        info!(artifact = %id, bytes, "Finished copying backup to instance");
        Ok(())
    }
}

#[async_trait]
impl Deployment for InstanceDeployment {
    fn instances(&self) -> &[Box<dyn Instance>] {
        &self.instances
    }

    fn is_backupable(&self) -> bool {
        self.backupable().next().is_some()
    }

    fn is_restorable(&self) -> bool {
        self.restorable().next().is_some()
    }

    fn has_unique_custom_artifact_names(&self) -> bool {
        let mut seen = HashSet::new();
        self.instances
            .iter()
            .flat_map(|i| i.custom_backup_artifact_names())
            .all(|name| seen.insert(name))
    }

    async fn check_artifact_dir(&self) -> anyhow::Result<()> {
        let mut messages = Vec::new();
        for instance in &self.instances {
            match instance.artifact_dir_exists().await {
                Ok(true) => messages.push(format!(
                    "Directory {} already exists on instance {}/{}",
                    instance.artifact_directory(),
                    instance.name(),
                    instance.id()
                )),
                Ok(false) => {}
                Err(e) => messages.push(format!(
                    "Error checking {}/{}! {:#}",
                    instance.name(),
                    instance.id(),
                    e
                )),
            }
        }

        if messages.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(messages.join("\n")))
        }
    }

    fn custom_artifact_names_match(&self) -> anyhow::Result<()> {
        let produced: HashSet<String> = self
            .instances
            .iter()
            .flat_map(|i| i.custom_backup_artifact_names())
            .collect();

        for instance in &self.instances {
            for requirement in instance.custom_restore_artifact_requirements() {
                if !produced.contains(&requirement.artifact) {
                    anyhow::bail!(
                        "The {} restore script expects a backup script which produces {} artifact which is not present in the deployment",
                        requirement.job,
                        requirement.artifact
                    );
                }
            }
        }
        Ok(())
    }

    async fn pre_backup_lock(&self) -> anyhow::Result<()> {
        let targets = self
            .instances
            .iter()
            .map(|i| i.as_ref())
            .filter(|i| i.is_backupable() || i.is_restorable())
            .collect::<Vec<&dyn Instance>>();
        self.fan_out(targets.into_iter(), |i| i.pre_backup_lock()).await
    }

    async fn backup(&self) -> anyhow::Result<()> {
        for instance in self.backupable() {
            debug!(instance = %format!("{}/{}", instance.name(), instance.id()), "Running backup");
            instance
                .backup()
                .await
                .with_context(|| format!("{}/{}", instance.name(), instance.id()))?;
        }
        Ok(())
    }

    async fn post_backup_unlock(&self) -> anyhow::Result<()> {
        let targets = self
            .instances
            .iter()
            .map(|i| i.as_ref())
            .collect::<Vec<&dyn Instance>>();
        self.fan_out(targets.into_iter(), |i| i.post_backup_unlock()).await
    }

    async fn restore(&self) -> anyhow::Result<()> {
        for instance in self.restorable() {
            debug!(instance = %format!("{}/{}", instance.name(), instance.id()), "Running restore");
            instance
                .restore()
                .await
                .with_context(|| format!("{}/{}", instance.name(), instance.id()))?;
        }
        Ok(())
    }

    async fn post_restore_unlock(&self) -> anyhow::Result<()> {
        let targets = self
            .instances
            .iter()
            .map(|i| i.as_ref())
            .collect::<Vec<&dyn Instance>>();
        self.fan_out(targets.into_iter(), |i| i.post_restore_unlock()).await
    }

    async fn copy_remote_backup_to_local(&self, backup: &dyn Backup) -> anyhow::Result<()> {
        for instance in self.backupable() {
            for artifact in instance.artifacts_to_backup() {
                self.copy_remote_artifact_to_local(backup, instance, artifact.as_ref())
                    .await?;
            }
        }
        Ok(())
    }

    async fn copy_local_backup_to_remote(&self, backup: &dyn Backup) -> anyhow::Result<()> {
        for instance in self.restorable() {
            for artifact in instance.artifacts_to_restore() {
                self.copy_local_artifact_to_remote(backup, instance, artifact.as_ref())
                    .await?;
                instance.mark_artifact_dir_created();
            }
        }
        Ok(())
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        let targets = self
            .instances
            .iter()
            .map(|i| i.as_ref())
            .collect::<Vec<&dyn Instance>>();
        self.fan_out(targets.into_iter(), |i| i.cleanup()).await
    }

    async fn cleanup_previous(&self) -> anyhow::Result<()> {
        let targets = self
            .instances
            .iter()
            .map(|i| i.as_ref())
            .filter(|i| i.is_backupable() || i.is_restorable())
            .collect::<Vec<&dyn Instance>>();
        self.fan_out(targets.into_iter(), |i| i.cleanup_previous()).await
    }
}
