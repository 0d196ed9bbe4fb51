//! Restore entry point.

use crate::bundle::BackupManager;
use crate::deployment::{Deployment, DeploymentManager};
use crate::utils::errors::{OrchestratorError, RunErrors};
use anyhow::anyhow;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Restorer {
    backup_manager: Arc<dyn BackupManager>,
    deployment_manager: Arc<dyn DeploymentManager>,
}

impl Restorer {
    pub fn new(
        backup_manager: Arc<dyn BackupManager>,
        deployment_manager: Arc<dyn DeploymentManager>,
    ) -> Self {
        Self {
            backup_manager,
            deployment_manager,
        }
    }

    /// Restores the bundle at `backup_path` into the named deployment.
    pub async fn restore(&self, deployment_name: &str, backup_path: &Path) -> RunErrors {
        info!(deployment = %deployment_name, path = %backup_path.display(), "Starting restore");

        let backup = match self.backup_manager.open(backup_path).await {
            Ok(backup) => backup,
            Err(e) => return RunErrors::generic(e),
        };

        match backup.valid().await {
            Ok(true) => {}
            Ok(false) => return RunErrors::generic(anyhow!("Backup is corrupted")),
            Err(e) => return RunErrors::generic(e.context("Backup is corrupted")),
        }

        let deployment = match self.deployment_manager.find(deployment_name).await {
            Ok(deployment) => deployment,
            Err(e) => return RunErrors::generic(e),
        };

        if !deployment.is_restorable() {
            return cleanup_and_return(
                deployment.as_ref(),
                anyhow!("Deployment '{}' has no restore scripts", deployment_name),
            )
            .await;
        }

        match backup
            .deployment_matches(deployment_name, deployment.instances())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                return cleanup_and_return(
                    deployment.as_ref(),
                    anyhow!(
                        "Deployment '{}' does not match the structure of the provided backup",
                        deployment_name
                    ),
                )
                .await;
            }
            Err(e) => {
                return cleanup_and_return(
                    deployment.as_ref(),
                    e.context(format!(
                        "Unable to check if deployment '{}' matches the structure of the provided backup",
                        deployment_name
                    )),
                )
                .await;
            }
        }

        if let Err(e) = deployment.check_artifact_dir().await {
            return cleanup_and_return(deployment.as_ref(), e).await;
        }

        if let Err(e) = deployment.copy_local_backup_to_remote(backup.as_ref()).await {
            return cleanup_and_return(
                deployment.as_ref(),
                e.context("Unable to send backup to remote machine"),
            )
            .await;
        }

        let restore_result = deployment.restore().await;
        let unlock_result = deployment.post_restore_unlock().await;

        if restore_result.is_err() || unlock_result.is_err() {
            let mut errors = RunErrors::new();
            if let Err(e) = restore_result {
                errors.push(OrchestratorError::Generic(e.context("Failed to restore")));
            }
            if let Err(e) = unlock_result {
                errors.push(OrchestratorError::Unlock(e.context("Failed to unlock")));
            }
            warn!(deployment = %deployment_name, "Restore failed, leaving instance state for restore-cleanup");
            return errors;
        }

        if let Err(e) = deployment.cleanup().await {
            return OrchestratorError::Cleanup(e.context("Restore cleanup failed")).into();
        }

        info!(deployment = %deployment_name, "Completed restore");
        RunErrors::new()
    }
}

/// Cleans up the deployment and reports the cleanup failure, if any,
/// ahead of the error that stopped the restore.
async fn cleanup_and_return(deployment: &dyn Deployment, err: anyhow::Error) -> RunErrors {
    let mut errors = RunErrors::new();
    if let Err(cleanup_err) = deployment.cleanup().await {
        errors.push(OrchestratorError::Cleanup(cleanup_err));
    }
    errors.push(OrchestratorError::Generic(err));
    errors
}
