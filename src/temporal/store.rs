// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::errors::{PipelineError, PipelineResult};
use crate::temporal::indexer::RegisterEntry;
use crate::traits::{DatasetSpec, TemporalStore};
use crate::workspace::is_valid_name;

/// A dataset and its entries, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDocument {
    pub spec: DatasetSpec,
    pub entries: Vec<RegisterEntry>,
}

impl DatasetDocument {
    fn new(spec: DatasetSpec) -> Self {
        Self {
            spec,
            entries: Vec::new(),
        }
    }

    /// Append entries not registered yet. Every entry must match the
    /// dataset's kind; nothing is appended if one does not.
    fn append(&mut self, entries: &[RegisterEntry]) -> PipelineResult<usize> {
        if let Some(mismatch) = entries.iter().find(|e| e.kind != self.spec.kind) {
            return Err(PipelineError::Store {
                dataset: self.spec.name.clone(),
                reason: format!(
                    "cannot register {} <{}> in a {} dataset",
                    mismatch.kind, mismatch.artifact, self.spec.kind
                ),
            });
        }

        let mut added = 0;
        for entry in entries {
            if !self.entries.contains(entry) {
                self.entries.push(entry.clone());
                added += 1;
            }
        }
        Ok(added)
    }
}

fn check_name(name: &str) -> PipelineResult<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(PipelineError::Store {
            dataset: name.to_string(),
            reason: "not a valid dataset name".to_string(),
        })
    }
}

fn missing(dataset: &str) -> PipelineError {
    PipelineError::Store {
        dataset: dataset.to_string(),
        reason: "dataset does not exist".to_string(),
    }
}

/// One JSON document per dataset under a directory.
pub struct FileTemporalStore {
    dir: PathBuf,
    // serialises read-modify-write of documents
    lock: Mutex<()>,
}

impl FileTemporalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document_path(&self, dataset: &str) -> PathBuf {
        self.dir.join(format!("{}.json", dataset))
    }

    async fn load(&self, dataset: &str) -> PipelineResult<DatasetDocument> {
        check_name(dataset)?;
        let raw = match tokio::fs::read(self.document_path(dataset)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(missing(dataset)),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&raw).map_err(|e| PipelineError::Store {
            dataset: dataset.to_string(),
            reason: format!("unreadable dataset document: {}", e),
        })
    }

    async fn save(&self, document: &DatasetDocument) -> PipelineResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let raw = serde_json::to_vec_pretty(document).map_err(|e| PipelineError::Store {
            dataset: document.spec.name.clone(),
            reason: e.to_string(),
        })?;
        let path = self.document_path(&document.spec.name);
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, raw).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl TemporalStore for FileTemporalStore {
    async fn create(&self, spec: &DatasetSpec) -> PipelineResult<()> {
        check_name(&spec.name)?;
        let _guard = self.lock.lock().await;
        self.save(&DatasetDocument::new(spec.clone())).await
    }

    async fn register(&self, dataset: &str, entries: &[RegisterEntry]) -> PipelineResult<usize> {
        let _guard = self.lock.lock().await;
        let mut document = self.load(dataset).await?;
        let added = document.append(entries)?;
        self.save(&document).await?;
        Ok(added)
    }

    async fn list(&self, dataset: &str) -> PipelineResult<Vec<RegisterEntry>> {
        let _guard = self.lock.lock().await;
        Ok(self.load(dataset).await?.entries)
    }
}

/// In-memory store for tests and embedding.
#[derive(Default)]
pub struct MemoryTemporalStore {
    datasets: Mutex<HashMap<String, DatasetDocument>>,
}

impl MemoryTemporalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn document(&self, dataset: &str) -> Option<DatasetDocument> {
        self.datasets.lock().await.get(dataset).cloned()
    }
}

#[async_trait]
impl TemporalStore for MemoryTemporalStore {
    async fn create(&self, spec: &DatasetSpec) -> PipelineResult<()> {
        check_name(&spec.name)?;
        self.datasets
            .lock()
            .await
            .insert(spec.name.clone(), DatasetDocument::new(spec.clone()));
        Ok(())
    }

    async fn register(&self, dataset: &str, entries: &[RegisterEntry]) -> PipelineResult<usize> {
        let mut datasets = self.datasets.lock().await;
        let document = datasets.get_mut(dataset).ok_or_else(|| missing(dataset))?;
        document.append(entries)
    }

    async fn list(&self, dataset: &str) -> PipelineResult<Vec<RegisterEntry>> {
        let datasets = self.datasets.lock().await;
        datasets
            .get(dataset)
            .map(|d| d.entries.clone())
            .ok_or_else(|| missing(dataset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::{Artifact, ArtifactKind};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn entry(artifact: Artifact) -> RegisterEntry {
        let at = NaiveDate::from_ymd_opt(2021, 6, 15)
            .and_then(|d| d.and_hms_opt(10, 30, 21))
            .unwrap();
        RegisterEntry::new(&artifact, at)
    }

    #[tokio::test]
    async fn file_store_round_trips_entries() {
        let dir = TempDir::new().unwrap();
        let store = FileTemporalStore::new(dir.path());
        let spec = DatasetSpec::new("s2", ArtifactKind::Raster, "Sentinel-2");
        store.create(&spec).await.unwrap();

        let first = entry(Artifact::raster("T32UMA_20210615T103021_B04"));
        let added = store
            .register("s2", &[first.clone(), first.clone()])
            .await
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(store.register("s2", &[first.clone()]).await.unwrap(), 0);

        let reopened = FileTemporalStore::new(dir.path());
        assert_eq!(reopened.list("s2").await.unwrap(), vec![first]);
    }

    #[tokio::test]
    async fn recreate_replaces_entries() {
        let store = MemoryTemporalStore::new();
        let spec = DatasetSpec::new("s2_clouds", ArtifactKind::Vector, "clouds");
        store.create(&spec).await.unwrap();
        store
            .register("s2_clouds", &[entry(Artifact::vector("T32UMA_20210615T103021_CLOUDS"))])
            .await
            .unwrap();

        store.create(&spec).await.unwrap();
        assert!(store.list("s2_clouds").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn kind_mismatch_is_rejected() {
        let store = MemoryTemporalStore::new();
        store
            .create(&DatasetSpec::new("s2", ArtifactKind::Raster, "Sentinel-2"))
            .await
            .unwrap();

        let result = store
            .register("s2", &[entry(Artifact::vector("T32UMA_20210615T103021_CLOUDS"))])
            .await;
        assert!(matches!(result, Err(PipelineError::Store { .. })));
    }

    #[tokio::test]
    async fn unknown_dataset_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = FileTemporalStore::new(dir.path());
        assert!(matches!(
            store.list("nope").await,
            Err(PipelineError::Store { .. })
        ));
    }
}
