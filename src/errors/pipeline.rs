// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Run-aborting error conditions.
//!
//! Everything in [`PipelineError`] terminates the whole run. Failures of a
//! single unit of work never show up here; the pool converts those into
//! [`UnitFailure`](crate::errors::UnitFailure) records instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// A required external processing step cannot be launched.
    #[error("External step '{step}' is not available: {reason}")]
    StepUnavailable { step: String, reason: String },

    /// An artifact name does not follow the `{prefix}_{YYYYMMDDTHHMMSS}_{band}` convention.
    #[error("Malformed artifact name '{name}': {reason}")]
    MalformedArtifactName { name: String, reason: String },

    /// A scene reached indexing without every layer it needs.
    #[error("Scene '{scene}' is missing required layers: {}", missing.join(", "))]
    IncompleteScene { scene: String, missing: Vec<String> },

    /// The shared namespace changed outside of reconciliation.
    #[error("Shared namespace '{namespace}' was modified outside reconciliation: {detail}")]
    IsolationViolation { namespace: String, detail: String },

    /// A worker context name is already held by an active context.
    #[error("Worker context '{0}' is already active")]
    ContextConflict(String),

    /// A worker context would reuse the name of a shared namespace or scratch directory.
    #[error("'{0}' is reserved for a shared namespace and cannot name a worker context")]
    ReservedContextName(String),

    /// A scene was submitted while another unit for it is still queued or running.
    #[error("Scene '{0}' already has a unit queued or running")]
    DuplicateDispatch(String),

    /// A scene finished the run without reaching a terminal mask state.
    #[error("Scene '{scene}' never reached a terminal state (stuck in {state})")]
    UnresolvedScene { scene: String, state: String },

    #[error("Metadata for '{layer}' is unavailable: {reason}")]
    Metadata { layer: String, reason: String },

    #[error("Temporal dataset '{dataset}': {reason}")]
    Store { dataset: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run was cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

pub type PipelineResult<T> = Result<T, PipelineError>;
