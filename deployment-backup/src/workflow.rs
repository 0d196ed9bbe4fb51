//! Backup workflow state machine.
//!
//! The workflow walks a fixed list of events once, in order. An event fires
//! only if the current state is one of its sources; a step that fails may
//! cancel its transition, leaving the machine where it was so that later
//! events are skipped until one of them accepts that state. `Cleanup` accepts
//! every state after the deployment was found, so it runs exactly once on
//! every path that got that far.

use crate::bundle::{Backup, BackupManager, Clock};
use crate::deployment::{Deployment, DeploymentManager};
use crate::utils::errors::{OrchestratorError, RunErrors};
use anyhow::anyhow;
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Ready,
    DeploymentExists,
    IsBackupable,
    ArtifactCreated,
    Locked,
    BackedUp,
    Unlocked,
    Drained,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    CheckDeploymentExists,
    CheckIsBackupable,
    CreateArtifact,
    PreBackupLock,
    Backup,
    PostBackupUnlock,
    Drain,
    Cleanup,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Ready => "ready",
            State::DeploymentExists => "deployment-exists",
            State::IsBackupable => "is-backupable",
            State::ArtifactCreated => "artifact-created",
            State::Locked => "locked",
            State::BackedUp => "backed-up",
            State::Unlocked => "unlocked",
            State::Drained => "drained",
            State::Finished => "finished",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Event::CheckDeploymentExists => "check-deployment-exists",
            Event::CheckIsBackupable => "check-is-backupable",
            Event::CreateArtifact => "create-artifact",
            Event::PreBackupLock => "pre-backup-lock",
            Event::Backup => "backup",
            Event::PostBackupUnlock => "post-backup-unlock",
            Event::Drain => "drain",
            Event::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct Transition {
    pub event: Event,
    pub sources: &'static [State],
    pub destination: State,
}

/// Full backup, in firing order.
pub const BACKUP_TRANSITIONS: &[Transition] = &[
    Transition {
        event: Event::CheckDeploymentExists,
        sources: &[State::Ready],
        destination: State::DeploymentExists,
    },
    Transition {
        event: Event::CheckIsBackupable,
        sources: &[State::DeploymentExists],
        destination: State::IsBackupable,
    },
    Transition {
        event: Event::CreateArtifact,
        sources: &[State::IsBackupable],
        destination: State::ArtifactCreated,
    },
    Transition {
        event: Event::PreBackupLock,
        sources: &[State::ArtifactCreated],
        destination: State::Locked,
    },
    Transition {
        event: Event::Backup,
        sources: &[State::Locked],
        destination: State::BackedUp,
    },
    Transition {
        event: Event::PostBackupUnlock,
        sources: &[State::BackedUp, State::ArtifactCreated],
        destination: State::Unlocked,
    },
    Transition {
        event: Event::Drain,
        sources: &[State::Unlocked],
        destination: State::Drained,
    },
    Transition {
        event: Event::Cleanup,
        sources: &[
            State::DeploymentExists,
            State::IsBackupable,
            State::ArtifactCreated,
            State::Unlocked,
            State::Drained,
        ],
        destination: State::Finished,
    },
];

/// Pre-checks only, answering whether a backup could run.
pub const CHECK_TRANSITIONS: &[Transition] = &[
    Transition {
        event: Event::CheckDeploymentExists,
        sources: &[State::Ready],
        destination: State::DeploymentExists,
    },
    Transition {
        event: Event::CheckIsBackupable,
        sources: &[State::DeploymentExists],
        destination: State::IsBackupable,
    },
    Transition {
        event: Event::Cleanup,
        sources: &[State::DeploymentExists, State::IsBackupable],
        destination: State::Finished,
    },
];

/// Whether a step lets its transition complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Advance,
    Cancel,
}

/// One run of the backup state machine against one deployment.
pub struct BackupWorkflow<'a> {
    deployment_name: String,
    deployment_manager: &'a dyn DeploymentManager,
    backup_manager: &'a dyn BackupManager,
    clock: &'a Clock,
    transitions: &'static [Transition],
    state: State,
    deployment: Option<Box<dyn Deployment>>,
    backup: Option<Box<dyn Backup>>,
    errors: RunErrors,
}

impl<'a> BackupWorkflow<'a> {
    pub fn new(
        deployment_name: &str,
        deployment_manager: &'a dyn DeploymentManager,
        backup_manager: &'a dyn BackupManager,
        clock: &'a Clock,
    ) -> Self {
        Self::with_transitions(
            deployment_name,
            deployment_manager,
            backup_manager,
            clock,
            BACKUP_TRANSITIONS,
        )
    }

    pub fn check_only(
        deployment_name: &str,
        deployment_manager: &'a dyn DeploymentManager,
        backup_manager: &'a dyn BackupManager,
        clock: &'a Clock,
    ) -> Self {
        Self::with_transitions(
            deployment_name,
            deployment_manager,
            backup_manager,
            clock,
            CHECK_TRANSITIONS,
        )
    }

    fn with_transitions(
        deployment_name: &str,
        deployment_manager: &'a dyn DeploymentManager,
        backup_manager: &'a dyn BackupManager,
        clock: &'a Clock,
        transitions: &'static [Transition],
    ) -> Self {
        Self {
            deployment_name: deployment_name.to_string(),
            deployment_manager,
            backup_manager,
            clock,
            transitions,
            state: State::Ready,
            deployment: None,
            backup: None,
            errors: RunErrors::new(),
        }
    }

    /// Runs every permitted event once and returns the accumulated errors.
    pub async fn run(mut self) -> RunErrors {
        self.drive().await;
        self.errors
    }

    async fn drive(&mut self) {
        for transition in self.transitions {
            if !transition.sources.contains(&self.state) {
                debug!(event = %transition.event, state = %self.state, "Skipping event");
                continue;
            }

            match self.fire(transition.event).await {
                Outcome::Advance => {
                    debug!(
                        event = %transition.event,
                        from = %self.state,
                        to = %transition.destination,
                        "Transition"
                    );
                    self.state = transition.destination;
                    self.enter(transition.destination).await;
                }
                Outcome::Cancel => {
                    debug!(event = %transition.event, state = %self.state, "Transition cancelled");
                }
            }
        }
    }

    async fn fire(&mut self, event: Event) -> Outcome {
        match event {
            Event::CheckDeploymentExists => self.check_deployment_exists().await,
            Event::CheckIsBackupable => self.check_is_backupable().await,
            Event::CreateArtifact => self.create_artifact().await,
            Event::PreBackupLock => self.pre_backup_lock().await,
            Event::Backup => self.backup().await,
            Event::PostBackupUnlock => self.post_backup_unlock().await,
            Event::Drain => self.drain().await,
            Event::Cleanup => self.cleanup().await,
        }
    }

    async fn enter(&mut self, state: State) {
        match state {
            State::ArtifactCreated => self.record_start_time().await,
            State::Finished => self.record_finish_time().await,
            _ => {}
        }
    }

    fn fail(&mut self, err: OrchestratorError) {
        warn!(deployment = %self.deployment_name, "{}", err);
        self.errors.push(err);
    }

    async fn check_deployment_exists(&mut self) -> Outcome {
        match self.deployment_manager.find(&self.deployment_name).await {
            Ok(deployment) => {
                self.deployment = Some(deployment);
                Outcome::Advance
            }
            Err(e) => {
                self.fail(OrchestratorError::Generic(e));
                Outcome::Cancel
            }
        }
    }

    async fn check_is_backupable(&mut self) -> Outcome {
        let Some(deployment) = self.deployment.as_deref() else {
            return Outcome::Cancel;
        };
        info!(deployment = %self.deployment_name, "Running pre-checks for backup");

        let result = if !deployment.is_backupable() {
            Err(anyhow!(
                "Deployment '{}' has no backup scripts",
                self.deployment_name
            ))
        } else if let Err(e) = deployment.check_artifact_dir().await {
            Err(e)
        } else if !deployment.has_unique_custom_artifact_names() {
            Err(anyhow!(
                "Multiple jobs in deployment '{}' specified the same backup name",
                self.deployment_name
            ))
        } else {
            deployment.custom_artifact_names_match()
        };

        match result {
            Ok(()) => Outcome::Advance,
            Err(e) => {
                self.fail(OrchestratorError::Generic(e));
                Outcome::Cancel
            }
        }
    }

    async fn create_artifact(&mut self) -> Outcome {
        info!(deployment = %self.deployment_name, "Starting backup");

        let backup = match self
            .backup_manager
            .create(&self.deployment_name, self.clock)
            .await
        {
            Ok(backup) => backup,
            Err(e) => {
                self.fail(OrchestratorError::Generic(e));
                return Outcome::Cancel;
            }
        };

        let saved = self
            .deployment_manager
            .save_manifest(&self.deployment_name, backup.as_ref())
            .await;
        self.backup = Some(backup);

        match saved {
            Ok(()) => Outcome::Advance,
            Err(e) => {
                self.fail(OrchestratorError::Generic(e));
                Outcome::Cancel
            }
        }
    }

    async fn record_start_time(&mut self) {
        let Some(backup) = self.backup.as_deref() else {
            return;
        };
        let result = backup
            .create_metadata_file_with_start_time((self.clock)())
            .await;
        if let Err(e) = result {
            self.fail(OrchestratorError::Generic(e));
        }
    }

    async fn pre_backup_lock(&mut self) -> Outcome {
        let Some(deployment) = self.deployment.as_deref() else {
            return Outcome::Cancel;
        };
        match deployment.pre_backup_lock().await {
            Ok(()) => Outcome::Advance,
            Err(e) => {
                self.fail(OrchestratorError::Lock(e));
                Outcome::Cancel
            }
        }
    }

    async fn backup(&mut self) -> Outcome {
        let Some(deployment) = self.deployment.as_deref() else {
            return Outcome::Cancel;
        };
        let result = deployment.backup().await;
        if let Err(e) = result {
            self.fail(OrchestratorError::Backup(e));
        }
        Outcome::Advance
    }

    async fn post_backup_unlock(&mut self) -> Outcome {
        let Some(deployment) = self.deployment.as_deref() else {
            return Outcome::Cancel;
        };
        let result = deployment.post_backup_unlock().await;
        if let Err(e) = result {
            self.fail(OrchestratorError::Unlock(e));
        }
        Outcome::Advance
    }

    async fn drain(&mut self) -> Outcome {
        if self.errors.is_fatal() {
            info!(deployment = %self.deployment_name, "Skipping drain after fatal errors");
            return Outcome::Cancel;
        }
        let (Some(deployment), Some(backup)) = (self.deployment.as_deref(), self.backup.as_deref())
        else {
            return Outcome::Cancel;
        };
        let result = deployment.copy_remote_backup_to_local(backup).await;
        if let Err(e) = result {
            self.fail(OrchestratorError::Generic(e));
        }
        Outcome::Advance
    }

    async fn cleanup(&mut self) -> Outcome {
        let Some(deployment) = self.deployment.as_deref() else {
            return Outcome::Advance;
        };
        let result = deployment.cleanup().await;
        if let Err(e) = result {
            self.fail(OrchestratorError::Cleanup(e));
        }
        Outcome::Advance
    }

    async fn record_finish_time(&mut self) {
        if self.errors.is_fatal() {
            return;
        }
        let Some(backup) = self.backup.as_deref() else {
            return;
        };
        match backup.add_finish_time((self.clock)()).await {
            Ok(()) => info!(
                deployment = %self.deployment_name,
                path = %backup.path().display(),
                "Backup created"
            ),
            Err(e) => self.fail(OrchestratorError::Generic(e)),
        }
    }
}
