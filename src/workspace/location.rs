// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Filesystem-backed namespaces.
//!
//! A [`Location`] is a root directory. Every namespace (the caller's shared one
//! and each worker's private one) is a subdirectory holding one directory per
//! [`ArtifactKind`]; an artifact is a single file named after the artifact.
//! A zero-length artifact file is a null layer.
//!
//! ```text
//! <root>/
//!   PERMANENT/raster/T32UMA_20210615T103021_B04
//!   PERMANENT/vector/T32UMA_20210615T103021_CLOUDS
//!   S2_import_1/raster/...
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::errors::{PipelineError, PipelineResult};
use crate::workspace::context::{ContextConfig, WorkerContext};

/// Kind of data layer an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Raster,
    Vector,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 2] = [ArtifactKind::Raster, ArtifactKind::Vector];

    pub fn dir_name(self) -> &'static str {
        match self {
            ArtifactKind::Raster => "raster",
            ArtifactKind::Vector => "vector",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A named output layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub name: String,
}

impl Artifact {
    pub fn raster(name: impl Into<String>) -> Self {
        Self {
            kind: ArtifactKind::Raster,
            name: name.into(),
        }
    }

    pub fn vector(name: impl Into<String>) -> Self {
        Self {
            kind: ArtifactKind::Vector,
            name: name.into(),
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.kind, self.name)
    }
}

/// Names become file and directory names, so they must be a single plain path component.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '@'])
        && !name.chars().any(char::is_whitespace)
}

/// Length and SHA-256 digest of one artifact's contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFingerprint {
    pub len: u64,
    digest: String,
}

impl ArtifactFingerprint {
    pub fn of(contents: &[u8]) -> Self {
        Self {
            len: contents.len() as u64,
            digest: format!("{:x}", Sha256::digest(contents)),
        }
    }
}

/// Content fingerprint of a namespace: artifact -> length and digest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceSnapshot {
    entries: BTreeMap<Artifact, ArtifactFingerprint>,
}

impl NamespaceSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, artifact: &Artifact) -> bool {
        self.entries.contains_key(artifact)
    }

    pub fn record(&mut self, artifact: Artifact, fingerprint: ArtifactFingerprint) {
        self.entries.insert(artifact, fingerprint);
    }

    /// Describe every way `actual` differs from `self`; empty when they match.
    pub fn differences(&self, actual: &NamespaceSnapshot) -> Vec<String> {
        let mut diffs = Vec::new();
        for (artifact, expected) in &self.entries {
            match actual.entries.get(artifact) {
                None => diffs.push(format!("{} disappeared", artifact)),
                Some(found) if found.len != expected.len => diffs.push(format!(
                    "{} changed size ({} -> {} bytes)",
                    artifact, expected.len, found.len
                )),
                Some(found) if found.digest != expected.digest => {
                    diffs.push(format!("{} changed content", artifact))
                }
                Some(_) => {}
            }
        }
        for artifact in actual.entries.keys() {
            if !self.entries.contains_key(artifact) {
                diffs.push(format!("unexpected {}", artifact));
            }
        }
        diffs
    }
}

/// One namespace directory inside a location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    name: String,
    path: PathBuf,
}

impl Namespace {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn artifact_path(&self, artifact: &Artifact) -> PathBuf {
        self.path.join(artifact.kind.dir_name()).join(&artifact.name)
    }

    /// Reference to an artifact of this namespace in `name@namespace` form.
    pub fn qualify(&self, artifact_name: &str) -> String {
        format!("{}@{}", artifact_name, self.name)
    }

    pub(crate) async fn ensure_layout(&self) -> io::Result<()> {
        for kind in ArtifactKind::ALL {
            tokio::fs::create_dir_all(self.path.join(kind.dir_name())).await?;
        }
        Ok(())
    }

    /// Artifact names of one kind, sorted.
    pub async fn list(&self, kind: ArtifactKind) -> io::Result<Vec<String>> {
        let dir = self.path.join(kind.dir_name());
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Every artifact, rasters first, each kind sorted by name.
    pub async fn list_all(&self) -> io::Result<Vec<Artifact>> {
        let mut artifacts = Vec::new();
        for kind in ArtifactKind::ALL {
            for name in self.list(kind).await? {
                artifacts.push(Artifact { kind, name });
            }
        }
        Ok(artifacts)
    }

    pub async fn contains(&self, artifact: &Artifact) -> bool {
        tokio::fs::metadata(self.artifact_path(artifact))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Whether the artifact is a null layer. Missing artifacts are an error.
    pub async fn is_null(&self, artifact: &Artifact) -> io::Result<bool> {
        let metadata = tokio::fs::metadata(self.artifact_path(artifact)).await?;
        Ok(metadata.len() == 0)
    }

    pub async fn write(&self, artifact: &Artifact, contents: &[u8]) -> io::Result<()> {
        self.ensure_layout().await?;
        tokio::fs::write(self.artifact_path(artifact), contents).await
    }

    pub async fn write_null(&self, artifact: &Artifact) -> io::Result<()> {
        self.write(artifact, &[]).await
    }

    pub async fn read(&self, artifact: &Artifact) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.artifact_path(artifact)).await
    }

    /// Remove an artifact; returns whether it existed.
    pub async fn remove(&self, artifact: &Artifact) -> io::Result<bool> {
        match tokio::fs::remove_file(self.artifact_path(artifact)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn snapshot(&self) -> io::Result<NamespaceSnapshot> {
        let mut snapshot = NamespaceSnapshot::default();
        for artifact in self.list_all().await? {
            let contents = tokio::fs::read(self.artifact_path(&artifact)).await?;
            snapshot.record(artifact, ArtifactFingerprint::of(&contents));
        }
        Ok(snapshot)
    }
}

/// Root directory holding every namespace of a run.
#[derive(Debug)]
pub struct Location {
    root: PathBuf,
    active: Mutex<HashSet<String>>,
    /// Opened namespaces and scratch directories; never valid context names.
    reserved: Mutex<HashSet<String>>,
}

impl Location {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            active: Mutex::new(HashSet::new()),
            reserved: Mutex::new(HashSet::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Handle to a namespace without touching the filesystem.
    pub fn namespace(&self, name: &str) -> Namespace {
        Namespace {
            name: name.to_string(),
            path: self.root.join(name),
        }
    }

    /// Open (creating if needed) a namespace.
    pub async fn open_namespace(&self, name: &str) -> PipelineResult<Namespace> {
        if !is_valid_name(name) {
            return Err(PipelineError::Config(format!(
                "'{}' is not a valid namespace name",
                name
            )));
        }
        self.reserve(name);
        let namespace = self.namespace(name);
        namespace.ensure_layout().await?;
        Ok(namespace)
    }

    /// Create a fresh private namespace for one unit.
    ///
    /// Fails with [`PipelineError::ContextConflict`] if `id` is held by an active
    /// context and with [`PipelineError::ReservedContextName`] if `id` names an
    /// opened namespace or a reserved directory. Leftovers from an earlier, no
    /// longer active context of the same name are removed first.
    pub async fn create_context(
        self: &Arc<Self>,
        id: &str,
        config: ContextConfig,
        memory_mb: u64,
    ) -> PipelineResult<WorkerContext> {
        if !is_valid_name(id) {
            return Err(PipelineError::Config(format!(
                "'{}' is not a valid worker context name",
                id
            )));
        }
        if lock_names(&self.reserved).contains(id) {
            return Err(PipelineError::ReservedContextName(id.to_string()));
        }
        {
            let mut active = self.lock_active();
            if !active.insert(id.to_string()) {
                return Err(PipelineError::ContextConflict(id.to_string()));
            }
        }

        let namespace = self.namespace(id);
        let prepared = async {
            match tokio::fs::remove_dir_all(namespace.path()).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
            namespace.ensure_layout().await
        }
        .await;

        if let Err(e) = prepared {
            self.release(id);
            return Err(e.into());
        }

        Ok(WorkerContext::new(
            id.to_string(),
            namespace,
            config,
            memory_mb,
            Arc::clone(self),
        ))
    }

    /// Number of contexts created and not yet discarded.
    pub fn active_contexts(&self) -> usize {
        self.lock_active().len()
    }

    pub(crate) fn release(&self, id: &str) {
        self.lock_active().remove(id);
    }

    /// Keep `name` from ever being used as a worker context.
    pub fn reserve(&self, name: &str) {
        lock_names(&self.reserved).insert(name.to_string());
    }

    fn lock_active(&self) -> MutexGuard<'_, HashSet<String>> {
        lock_names(&self.active)
    }
}

fn lock_names(names: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    // a poisoned set is still a valid set of names
    names.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn namespace_lists_artifacts_by_kind() {
        let dir = TempDir::new().unwrap();
        let location = Location::new(dir.path());
        let ns = location.open_namespace("PERMANENT").await.unwrap();

        ns.write(&Artifact::raster("b"), b"1").await.unwrap();
        ns.write(&Artifact::raster("a"), b"1").await.unwrap();
        ns.write(&Artifact::vector("v"), b"1").await.unwrap();

        assert_eq!(ns.list(ArtifactKind::Raster).await.unwrap(), vec!["a", "b"]);
        assert_eq!(
            ns.list_all().await.unwrap(),
            vec![
                Artifact::raster("a"),
                Artifact::raster("b"),
                Artifact::vector("v")
            ]
        );
    }

    #[tokio::test]
    async fn empty_file_is_a_null_layer() {
        let dir = TempDir::new().unwrap();
        let location = Location::new(dir.path());
        let ns = location.open_namespace("PERMANENT").await.unwrap();
        let clouds = Artifact::raster("clouds");

        ns.write_null(&clouds).await.unwrap();
        assert!(ns.is_null(&clouds).await.unwrap());

        ns.write(&clouds, b"mask").await.unwrap();
        assert!(!ns.is_null(&clouds).await.unwrap());
    }

    #[tokio::test]
    async fn snapshot_differences_report_foreign_changes() {
        let dir = TempDir::new().unwrap();
        let location = Location::new(dir.path());
        let ns = location.open_namespace("PERMANENT").await.unwrap();
        ns.write(&Artifact::raster("keep"), b"12").await.unwrap();

        let before = ns.snapshot().await.unwrap();
        ns.write(&Artifact::raster("intruder"), b"x").await.unwrap();
        ns.write(&Artifact::raster("keep"), b"123").await.unwrap();

        let after = ns.snapshot().await.unwrap();
        let diffs = before.differences(&after);
        assert_eq!(diffs.len(), 2);
        assert!(diffs.iter().any(|d| d.contains("intruder")));
        assert!(diffs.iter().any(|d| d.contains("changed size")));
    }

    #[tokio::test]
    async fn snapshot_notices_same_size_rewrites() {
        let dir = TempDir::new().unwrap();
        let location = Location::new(dir.path());
        let ns = location.open_namespace("PERMANENT").await.unwrap();
        let band = Artifact::raster("T32UMA_20210615T103021_B04");
        ns.write(&band, b"good").await.unwrap();

        let before = ns.snapshot().await.unwrap();
        ns.write(&band, b"EVIL").await.unwrap();

        let diffs = before.differences(&ns.snapshot().await.unwrap());
        assert_eq!(diffs, vec![format!("{} changed content", band)]);
    }

    #[tokio::test]
    async fn context_never_takes_over_a_shared_namespace() {
        let dir = TempDir::new().unwrap();
        let location = Arc::new(Location::new(dir.path()));
        let shared = location.open_namespace("S2_import_1").await.unwrap();
        let band = Artifact::raster("T32UMA_20210615T103021_B04");
        shared.write(&band, b"band").await.unwrap();
        location.reserve("sen2cor_4242");

        for id in ["S2_import_1", "sen2cor_4242"] {
            let result = location
                .create_context(id, ContextConfig::default(), 100)
                .await;
            assert!(matches!(result, Err(PipelineError::ReservedContextName(ref name)) if name == id));
        }
        assert_eq!(shared.read(&band).await.unwrap(), b"band");
        assert_eq!(location.active_contexts(), 0);
    }

    #[tokio::test]
    async fn active_context_names_cannot_be_reused() {
        let dir = TempDir::new().unwrap();
        let location = Arc::new(Location::new(dir.path()));

        let first = location
            .create_context("S2_import_1", ContextConfig::default(), 100)
            .await
            .unwrap();
        let second = location
            .create_context("S2_import_1", ContextConfig::default(), 100)
            .await;
        assert!(matches!(second, Err(PipelineError::ContextConflict(_))));

        first.discard().await.unwrap();
        let third = location
            .create_context("S2_import_1", ContextConfig::default(), 100)
            .await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn stale_context_directory_is_cleared() {
        let dir = TempDir::new().unwrap();
        let location = Arc::new(Location::new(dir.path()));
        let stale = location.namespace("S2_import_1");
        stale.write(&Artifact::raster("leftover"), b"x").await.unwrap();

        let context = location
            .create_context("S2_import_1", ContextConfig::default(), 100)
            .await
            .unwrap();
        assert!(context.namespace().list_all().await.unwrap().is_empty());
    }

    #[test]
    fn names_must_be_single_path_components() {
        assert!(is_valid_name("S2_import_1"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("../escape"));
        assert!(!is_valid_name("clouds@PERMANENT"));
        assert!(!is_valid_name("two words"));
    }
}
