//! Bundle metadata, serialized as `metadata.json` in each bundle directory.

use crate::checksum::BackupChecksum;
use crate::instance::ArtifactIdentifier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BackupMetadata {
    #[serde(default)]
    pub instances: Vec<InstanceMetadata>,
    #[serde(default)]
    pub custom_artifacts: Vec<ArtifactMetadata>,
    pub backup_activity: BackupActivity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceMetadata {
    pub name: String,
    pub index: String,
    #[serde(default)]
    pub artifacts: Vec<ArtifactMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactMetadata {
    pub name: String,
    pub checksums: BackupChecksum,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BackupActivity {
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finish_time: Option<DateTime<Utc>>,
}

impl BackupMetadata {
    pub fn with_start_time(time: DateTime<Utc>) -> Self {
        Self {
            backup_activity: BackupActivity {
                start_time: Some(time),
                finish_time: None,
            },
            ..Default::default()
        }
    }

    pub fn add_checksum(&mut self, id: &ArtifactIdentifier, checksums: BackupChecksum) {
        let artifact = ArtifactMetadata {
            name: id.name.clone(),
            checksums,
        };

        if id.has_custom_name {
            self.custom_artifacts.push(artifact);
            return;
        }

        match self
            .instances
            .iter_mut()
            .find(|i| i.name == id.instance_name && i.index == id.instance_index)
        {
            Some(instance) => instance.artifacts.push(artifact),
            None => self.instances.push(InstanceMetadata {
                name: id.instance_name.clone(),
                index: id.instance_index.clone(),
                artifacts: vec![artifact],
            }),
        }
    }

    pub fn checksum_for(&self, id: &ArtifactIdentifier) -> Option<&BackupChecksum> {
        if id.has_custom_name {
            return self
                .custom_artifacts
                .iter()
                .find(|a| a.name == id.name)
                .map(|a| &a.checksums);
        }

        self.instances
            .iter()
            .find(|i| i.name == id.instance_name && i.index == id.instance_index)
            .and_then(|i| i.artifacts.iter().find(|a| a.name == id.name))
            .map(|a| &a.checksums)
    }

    /// Every artifact recorded in the bundle, with its checksum.
    pub fn artifacts(&self) -> Vec<(ArtifactIdentifier, &BackupChecksum)> {
        let mut out = Vec::new();
        for instance in &self.instances {
            for artifact in &instance.artifacts {
                out.push((
                    ArtifactIdentifier {
                        instance_name: instance.name.clone(),
                        instance_index: instance.index.clone(),
                        name: artifact.name.clone(),
                        has_custom_name: false,
                    },
                    &artifact.checksums,
                ));
            }
        }
        for artifact in &self.custom_artifacts {
            out.push((
                ArtifactIdentifier {
                    instance_name: String::new(),
                    instance_index: String::new(),
                    name: artifact.name.clone(),
                    has_custom_name: true,
                },
                &artifact.checksums,
            ));
        }
        out
    }
}
