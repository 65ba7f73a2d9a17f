// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::errors::PipelineResult;
use crate::temporal::naming::{ArtifactName, LayerKind};
use crate::workspace::{Artifact, ArtifactKind};

pub const REGISTER_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One artifact registered at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterEntry {
    pub artifact: String,
    pub kind: ArtifactKind,
    pub timestamp: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_label: Option<String>,
}

impl RegisterEntry {
    pub fn new(artifact: &Artifact, timestamp: NaiveDateTime) -> Self {
        Self {
            artifact: artifact.name.clone(),
            kind: artifact.kind,
            timestamp,
            semantic_label: None,
        }
    }

    /// `name|YYYY-MM-DD HH:MM:SS[|label]`
    pub fn register_line(&self) -> String {
        let mut line = format!(
            "{}|{}",
            self.artifact,
            self.timestamp.format(REGISTER_TIME_FORMAT)
        );
        if let Some(label) = &self.semantic_label {
            line.push('|');
            line.push_str(label);
        }
        line
    }
}

/// Artifacts of one scene and one layer kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub scene: String,
    pub kind: LayerKind,
    pub artifacts: Vec<Artifact>,
}

/// Turns artifact names into register entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemporalIndexer {
    semantic_labels: bool,
}

impl TemporalIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `S2_{band}` labels to band entries.
    pub fn with_semantic_labels(mut self, enabled: bool) -> Self {
        self.semantic_labels = enabled;
        self
    }

    /// One entry per distinct artifact name, in first-seen order. Any
    /// malformed name fails the whole call.
    pub fn build_entries<'a, I>(&self, artifacts: I) -> PipelineResult<Vec<RegisterEntry>>
    where
        I: IntoIterator<Item = &'a Artifact>,
    {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for artifact in artifacts {
            if !seen.insert(artifact.name.as_str()) {
                continue;
            }
            let parsed = ArtifactName::parse(&artifact.name)?;
            let mut entry = RegisterEntry::new(artifact, parsed.timestamp());
            if self.semantic_labels && parsed.layer_kind() == LayerKind::Band {
                entry.semantic_label = Some(parsed.semantic_label());
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Group artifacts by `(scene, layer kind)`, partitions and their members
    /// in first-seen order, duplicates dropped.
    pub fn partition<'a, I>(&self, artifacts: I) -> PipelineResult<Vec<Partition>>
    where
        I: IntoIterator<Item = &'a Artifact>,
    {
        let mut partitions: Vec<Partition> = Vec::new();
        for artifact in artifacts {
            let parsed = ArtifactName::parse(&artifact.name)?;
            let scene = parsed.scene();
            let kind = parsed.layer_kind();
            let position = partitions
                .iter()
                .position(|p| p.scene == scene && p.kind == kind);
            let partition = match position {
                Some(index) => &mut partitions[index],
                None => {
                    partitions.push(Partition {
                        scene,
                        kind,
                        artifacts: Vec::new(),
                    });
                    let last = partitions.len() - 1;
                    &mut partitions[last]
                }
            };
            if !partition.artifacts.contains(artifact) {
                partition.artifacts.push(artifact.clone());
            }
        }
        Ok(partitions)
    }

    /// Entries of every partition of `kind`, in partition order.
    pub fn entries_of_kind<'a, I>(
        &self,
        artifacts: I,
        kind: LayerKind,
    ) -> PipelineResult<Vec<RegisterEntry>>
    where
        I: IntoIterator<Item = &'a Artifact>,
    {
        let partitions = self.partition(artifacts)?;
        self.build_entries(
            partitions
                .iter()
                .filter(|p| p.kind == kind)
                .flat_map(|p| p.artifacts.iter()),
        )
    }
}
