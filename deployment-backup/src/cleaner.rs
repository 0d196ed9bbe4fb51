//! Removes artifact directories left behind by an interrupted run.

use crate::deployment::DeploymentManager;
use crate::utils::errors::{OrchestratorError, RunErrors};
use std::sync::Arc;
use tracing::info;

pub struct Cleaner {
    deployment_manager: Arc<dyn DeploymentManager>,
}

impl Cleaner {
    pub fn new(deployment_manager: Arc<dyn DeploymentManager>) -> Self {
        Self { deployment_manager }
    }

    pub async fn cleanup(&self, deployment_name: &str) -> RunErrors {
        let deployment = match self.deployment_manager.find(deployment_name).await {
            Ok(deployment) => deployment,
            Err(e) => return RunErrors::generic(e),
        };

        if let Err(e) = deployment.cleanup_previous().await {
            return OrchestratorError::Cleanup(e).into();
        }

        info!(deployment = %deployment_name, "Cleaned up previous artifacts");
        RunErrors::new()
    }
}
