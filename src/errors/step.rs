// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::engine::StepKind;

/// Failure of one external step invocation inside a worker context.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    #[error("'{program}' exited with status {code:?}: {stderr}")]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to launch '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("step did not finish within {0:?}")]
    TimedOut(Duration),

    /// The step ran but refused to produce output (e.g. nothing above the area threshold).
    #[error("step rejected the request: {0}")]
    Rejected(String),

    #[error("I/O error in worker context: {0}")]
    Io(String),

    #[error("cancelled before completion")]
    Cancelled,
}

impl From<std::io::Error> for StepError {
    fn from(err: std::io::Error) -> Self {
        StepError::Io(err.to_string())
    }
}

/// Structured record of a unit that did not complete, produced at the pool boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitFailure {
    pub unit_id: String,
    pub scene: String,
    /// The step that failed, or `None` when the unit failed before any step ran.
    pub step: Option<StepKind>,
    pub reason: String,
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.step {
            Some(step) => write!(
                f,
                "unit '{}' (scene '{}') failed in {}: {}",
                self.unit_id, self.scene, step, self.reason
            ),
            None => write!(
                f,
                "unit '{}' (scene '{}') failed: {}",
                self.unit_id, self.scene, self.reason
            ),
        }
    }
}

/// How the worker pool reacts when one unit fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStrategy {
    /// Record the failure and keep running every other unit.
    #[default]
    ContinueOnError,
    /// Cancel the pool on the first failure; in-flight contexts are torn down.
    FailFast,
}
