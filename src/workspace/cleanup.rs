// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::workspace::location::{Artifact, Namespace};

/// Something a run created only temporarily.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupTarget {
    /// An artifact in a namespace (e.g. a per-scene mask superseded by a merge).
    Artifact {
        namespace: Namespace,
        artifact: Artifact,
    },
    /// A scratch directory (e.g. atmospheric correction output).
    Directory(PathBuf),
}

impl fmt::Display for CleanupTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupTarget::Artifact {
                namespace,
                artifact,
            } => write!(f, "{}@{}", artifact, namespace.name()),
            CleanupTarget::Directory(path) => write!(f, "directory {}", path.display()),
        }
    }
}

/// Per-run registry of temporary targets.
///
/// Targets are removed by [`CleanupRegistry::drain`]. A registry dropped
/// before being drained removes its targets synchronously, so every exit path
/// of a run tears down what it created.
#[derive(Debug, Default)]
pub struct CleanupRegistry {
    targets: Mutex<Vec<CleanupTarget>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, target: CleanupTarget) {
        let mut targets = self.lock();
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    pub fn register_artifact(&self, namespace: &Namespace, artifact: Artifact) {
        self.register(CleanupTarget::Artifact {
            namespace: namespace.clone(),
            artifact,
        });
    }

    pub fn register_directory(&self, path: impl Into<PathBuf>) {
        self.register(CleanupTarget::Directory(path.into()));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove every registered target. All targets are attempted; the first
    /// failure (if any) is returned after the rest were tried.
    pub async fn drain(&self) -> io::Result<usize> {
        let targets = std::mem::take(&mut *self.lock());
        let mut removed = 0;
        let mut first_error = None;

        for target in targets {
            let result = match &target {
                CleanupTarget::Artifact {
                    namespace,
                    artifact,
                } => namespace.remove(artifact).await.map(|_| ()),
                CleanupTarget::Directory(path) => match tokio::fs::remove_dir_all(path).await {
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                    other => other,
                },
            };
            match result {
                Ok(()) => {
                    tracing::debug!(target_name = %target, "Removed temporary target");
                    removed += 1;
                }
                Err(e) => {
                    tracing::warn!(target_name = %target, error = %e, "Failed to remove temporary target");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CleanupTarget>> {
        self.targets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for CleanupRegistry {
    fn drop(&mut self) {
        let targets = std::mem::take(&mut *self.lock());
        for target in targets {
            let result = match &target {
                CleanupTarget::Artifact {
                    namespace,
                    artifact,
                } => std::fs::remove_file(namespace.artifact_path(artifact)),
                CleanupTarget::Directory(path) => std::fs::remove_dir_all(path),
            };
            if let Err(e) = result {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(target_name = %target, error = %e, "Failed to remove temporary target");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::Location;
    use tempfile::TempDir;

    #[tokio::test]
    async fn drain_removes_registered_targets() {
        let dir = TempDir::new().unwrap();
        let location = Location::new(dir.path());
        let shared = location.open_namespace("PERMANENT").await.unwrap();
        let superseded = Artifact::raster("T32UMA_20210615T103021_clouds");
        shared.write(&superseded, b"mask").await.unwrap();
        let scratch = dir.path().join("sen2cor_1");
        std::fs::create_dir_all(&scratch).unwrap();

        let registry = CleanupRegistry::new();
        registry.register_artifact(&shared, superseded.clone());
        registry.register_directory(&scratch);
        registry.register_directory(&scratch);
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.drain().await.unwrap(), 2);
        assert!(!shared.contains(&superseded).await);
        assert!(!scratch.exists());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn dropping_an_undrained_registry_still_cleans_up() {
        let dir = TempDir::new().unwrap();
        let scratch = dir.path().join("scratch");
        std::fs::create_dir_all(&scratch).unwrap();

        {
            let registry = CleanupRegistry::new();
            registry.register_directory(&scratch);
        }

        assert!(!scratch.exists());
    }

    #[tokio::test]
    async fn missing_targets_are_not_errors() {
        let dir = TempDir::new().unwrap();
        let registry = CleanupRegistry::new();
        registry.register_directory(dir.path().join("never_created"));
        assert_eq!(registry.drain().await.unwrap(), 1);
    }
}
