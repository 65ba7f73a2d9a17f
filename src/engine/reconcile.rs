// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::HashMap;

use crate::engine::pool::CompletedUnit;
use crate::engine::unit::WorkUnit;
use crate::errors::{PipelineError, PipelineResult};
use crate::observability::messages::reconcile::{
    ArtifactsReconciled, IsolationViolated, NullArtifactPublished,
};
use crate::observability::messages::StructuredLog;
use crate::workspace::{Artifact, ArtifactFingerprint, Namespace, NamespaceSnapshot, WorkerContext};

/// Outputs of one unit after they were copied into the shared namespace.
#[derive(Debug)]
pub struct ReconciledUnit {
    pub unit: WorkUnit,
    pub artifacts: Vec<Artifact>,
    pub warnings: Vec<String>,
}

/// Sole writer of the shared namespace during a run.
///
/// The reconciler remembers what the shared namespace looked like when it was
/// created and keeps that picture up to date with its own writes. Any other
/// difference means a worker escaped its context, which is fatal.
pub struct ResultReconciler {
    shared: Namespace,
    expected: NamespaceSnapshot,
    /// Artifact -> context that wrote it during this run.
    written_by: HashMap<Artifact, String>,
}

impl ResultReconciler {
    /// Capture the shared namespace as the caller left it.
    pub async fn new(shared: Namespace) -> PipelineResult<Self> {
        let expected = shared.snapshot().await?;
        Ok(Self {
            shared,
            expected,
            written_by: HashMap::new(),
        })
    }

    pub fn shared(&self) -> &Namespace {
        &self.shared
    }

    /// Fail with [`PipelineError::IsolationViolation`] if anything but this
    /// reconciler changed the shared namespace.
    pub async fn verify(&self) -> PipelineResult<()> {
        let actual = match self.shared.snapshot().await {
            Ok(actual) => actual,
            Err(e) => {
                return Err(self.violation(format!("shared namespace unreadable: {}", e)));
            }
        };
        let differences = self.expected.differences(&actual);
        if differences.is_empty() {
            Ok(())
        } else {
            Err(self.violation(differences.join("; ")))
        }
    }

    fn violation(&self, detail: String) -> PipelineError {
        IsolationViolated {
            namespace: self.shared.name(),
            detail: &detail,
        }
        .log();
        PipelineError::IsolationViolation {
            namespace: self.shared.name().to_string(),
            detail,
        }
    }

    /// Copy every artifact of `context` into the shared namespace under its
    /// own name, then delete the context whatever the outcome.
    ///
    /// Existing artifacts of the same name are overwritten. A context with no
    /// artifacts yields an empty list.
    pub async fn reconcile(&mut self, context: WorkerContext) -> PipelineResult<Vec<Artifact>> {
        let result = self.copy_from(&context).await;
        let context_id = context.id().to_string();
        if let Err(e) = context.discard().await {
            tracing::warn!(context = %context_id, error = %e, "Failed to discard worker context");
        }
        result
    }

    async fn copy_from(&mut self, context: &WorkerContext) -> PipelineResult<Vec<Artifact>> {
        self.verify().await?;

        let artifacts = context.namespace().list_all().await?;
        for artifact in &artifacts {
            let source = context.namespace().artifact_path(artifact);
            let contents = tokio::fs::read(&source).await?;
            self.shared.write(artifact, &contents).await?;
            self.expected
                .record(artifact.clone(), ArtifactFingerprint::of(&contents));

            if let Some(previous) = self
                .written_by
                .insert(artifact.clone(), context.id().to_string())
            {
                if previous != context.id() {
                    tracing::warn!(
                        artifact = %artifact.name,
                        previous = %previous,
                        context = context.id(),
                        "Artifact name produced by two units; keeping the later copy"
                    );
                }
            }
        }

        ArtifactsReconciled {
            context: context.id(),
            shared: self.shared.name(),
            artifact_count: artifacts.len(),
        }
        .log();
        Ok(artifacts)
    }

    /// Reconcile every completed unit of a pool run, in submission order.
    /// On error the remaining contexts are dropped, which deletes them.
    pub async fn reconcile_all(
        &mut self,
        completed: Vec<CompletedUnit>,
    ) -> PipelineResult<Vec<ReconciledUnit>> {
        let mut reconciled = Vec::with_capacity(completed.len());
        for done in completed {
            let artifacts = self.reconcile(done.context).await?;
            reconciled.push(ReconciledUnit {
                unit: done.unit,
                artifacts,
                warnings: done.warnings,
            });
        }
        Ok(reconciled)
    }

    /// Write an empty layer in place of an output that was never produced.
    pub async fn publish_null(&mut self, artifact: &Artifact, reason: &str) -> PipelineResult<()> {
        self.verify().await?;
        NullArtifactPublished {
            artifact: &artifact.name,
            reason,
        }
        .log();
        self.shared.write_null(artifact).await?;
        self.expected
            .record(artifact.clone(), ArtifactFingerprint::of(&[]));
        Ok(())
    }

    /// Whether `artifact` is present in the shared namespace and null.
    pub async fn is_null(&self, artifact: &Artifact) -> PipelineResult<bool> {
        Ok(self.shared.is_null(artifact).await?)
    }
}
