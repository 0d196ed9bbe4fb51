//! Backup entry points.

use crate::bundle::{system_clock, BackupManager, Clock};
use crate::deployment::DeploymentManager;
use crate::utils::errors::RunErrors;
use crate::workflow::BackupWorkflow;
use std::sync::Arc;

pub struct Backuper {
    backup_manager: Arc<dyn BackupManager>,
    deployment_manager: Arc<dyn DeploymentManager>,
    clock: Clock,
}

impl Backuper {
    pub fn new(
        backup_manager: Arc<dyn BackupManager>,
        deployment_manager: Arc<dyn DeploymentManager>,
    ) -> Self {
        Self {
            backup_manager,
            deployment_manager,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Backs up the named deployment into a new bundle.
    pub async fn backup(&self, deployment_name: &str) -> RunErrors {
        BackupWorkflow::new(
            deployment_name,
            self.deployment_manager.as_ref(),
            self.backup_manager.as_ref(),
            &self.clock,
        )
        .run()
        .await
    }

    /// Runs the backup pre-checks without locking or copying anything.
    pub async fn can_be_backed_up(&self, deployment_name: &str) -> (bool, RunErrors) {
        let errors = BackupWorkflow::check_only(
            deployment_name,
            self.deployment_manager.as_ref(),
            self.backup_manager.as_ref(),
            &self.clock,
        )
        .run()
        .await;
        (errors.is_nil(), errors)
    }
}
