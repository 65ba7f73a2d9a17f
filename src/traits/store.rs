// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::PipelineResult;
use crate::temporal::RegisterEntry;
use crate::workspace::ArtifactKind;

/// Parameters of a temporal dataset to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub name: String,
    pub kind: ArtifactKind,
    pub title: String,
    pub description: String,
}

impl DatasetSpec {
    pub fn new(name: impl Into<String>, kind: ArtifactKind, title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            name: name.into(),
            kind,
            description: title.clone(),
            title,
        }
    }
}

/// Temporal-dataset store, treated as append-only.
#[async_trait]
pub trait TemporalStore: Send + Sync {
    /// Create (or re-create, dropping previous entries) a dataset.
    async fn create(&self, spec: &DatasetSpec) -> PipelineResult<()>;

    /// Append entries; entries already registered are ignored.
    /// Returns how many were added.
    async fn register(&self, dataset: &str, entries: &[RegisterEntry]) -> PipelineResult<usize>;

    /// Entries of a dataset in registration order.
    async fn list(&self, dataset: &str) -> PipelineResult<Vec<RegisterEntry>>;
}

/// Read-only per-layer metadata documents.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Cloudy pixel percentage recorded for the scene `layer` belongs to.
    async fn cloud_percentage(&self, layer: &str) -> PipelineResult<f64>;

    /// Location of the document for `layer`, handed to steps that read it themselves.
    fn document_path(&self, layer: &str) -> PathBuf;
}
