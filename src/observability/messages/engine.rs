// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for worker pool lifecycle and per-unit progress.
//!
//! This module contains message types for logging events related to:
//! * Pool start-up and the resources it was given
//! * Dispatch progress of individual units ("Processing k of n")
//! * Unit completion and failure
//! * Pool drain and cancellation

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// A worker pool was created and is about to accept units.
///
/// # Log Level
/// `info!` - Important operational event
///
/// # Example
/// ```
/// use scenestack::observability::messages::engine::PoolStarted;
///
/// let msg = PoolStarted {
///     label: "import",
///     unit_count: 12,
///     max_concurrency: 4,
///     memory_per_worker_mb: 750,
/// };
///
/// tracing::info!("{}", msg);
/// ```
pub struct PoolStarted<'a> {
    pub label: &'a str,
    pub unit_count: usize,
    pub max_concurrency: usize,
    pub memory_per_worker_mb: u64,
}

impl Display for PoolStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Starting {} pool: {} units, max_concurrency={}, memory_per_worker={} MB",
            self.label, self.unit_count, self.max_concurrency, self.memory_per_worker_mb
        )
    }
}

impl StructuredLog for PoolStarted<'_> {
    fn log(&self) {
        tracing::info!(
            pool = self.label,
            unit_count = self.unit_count,
            max_concurrency = self.max_concurrency,
            memory_per_worker_mb = self.memory_per_worker_mb,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "pool",
            span_name = name,
            pool = self.label,
            unit_count = self.unit_count,
            max_concurrency = self.max_concurrency,
        )
    }
}

/// A unit acquired a pool slot and its worker context is being created.
///
/// # Log Level
/// `info!` - User-visible progress
pub struct UnitDispatched<'a> {
    pub unit_id: &'a str,
    pub position: usize,
    pub total: usize,
}

impl Display for UnitDispatched<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Processing {} of {} ({})",
            self.position, self.total, self.unit_id
        )
    }
}

impl StructuredLog for UnitDispatched<'_> {
    fn log(&self) {
        tracing::info!(
            unit_id = self.unit_id,
            position = self.position,
            total = self.total,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "unit",
            span_name = name,
            unit_id = self.unit_id,
            position = self.position,
        )
    }
}

/// Every step of a unit finished successfully.
///
/// # Log Level
/// `debug!` - Detailed diagnostic information
pub struct UnitCompleted<'a> {
    pub unit_id: &'a str,
    pub step_count: usize,
    pub duration: std::time::Duration,
}

impl Display for UnitCompleted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Unit '{}' completed {} step(s) in {:?}",
            self.unit_id, self.step_count, self.duration
        )
    }
}

impl StructuredLog for UnitCompleted<'_> {
    fn log(&self) {
        tracing::debug!(
            unit_id = self.unit_id,
            step_count = self.step_count,
            duration_ms = self.duration.as_millis() as u64,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "unit_completed",
            span_name = name,
            unit_id = self.unit_id,
            duration = ?self.duration,
        )
    }
}

/// A unit failed; its worker context has been discarded.
///
/// # Log Level
/// `error!` - Failure requiring attention
///
/// # Example
/// ```
/// use scenestack::observability::messages::engine::UnitFailed;
///
/// let msg = UnitFailed {
///     unit_id: "S2_import_2",
///     step: "import",
///     error: "exited with status 1",
/// };
///
/// tracing::error!("{}", msg);
/// ```
pub struct UnitFailed<'a> {
    pub unit_id: &'a str,
    pub step: &'a str,
    pub error: &'a str,
}

impl Display for UnitFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Unit '{}' failed during {}: {}",
            self.unit_id, self.step, self.error
        )
    }
}

impl StructuredLog for UnitFailed<'_> {
    fn log(&self) {
        tracing::error!(
            unit_id = self.unit_id,
            step = self.step,
            error = self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!(
            "unit_failed",
            span_name = name,
            unit_id = self.unit_id,
            step = self.step,
        )
    }
}

/// A step finished but reported something worth surfacing.
///
/// # Log Level
/// `warn!` - Potential issue
pub struct StepWarning<'a> {
    pub unit_id: &'a str,
    pub warning: &'a str,
}

impl Display for StepWarning<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{} ({})", self.warning, self.unit_id)
    }
}

impl StructuredLog for StepWarning<'_> {
    fn log(&self) {
        tracing::warn!(unit_id = self.unit_id, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("step_warning", span_name = name, unit_id = self.unit_id)
    }
}

/// All submitted units reached a terminal state.
///
/// # Log Level
/// `info!` - Important operational event
pub struct PoolDrained<'a> {
    pub label: &'a str,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub peak_active: usize,
}

impl Display for PoolDrained<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} pool drained: {} completed, {} failed, {} cancelled (peak {} active)",
            self.label, self.completed, self.failed, self.cancelled, self.peak_active
        )
    }
}

impl StructuredLog for PoolDrained<'_> {
    fn log(&self) {
        tracing::info!(
            pool = self.label,
            completed = self.completed,
            failed = self.failed,
            cancelled = self.cancelled,
            peak_active = self.peak_active,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "pool_drained",
            span_name = name,
            pool = self.label,
            failed = self.failed,
        )
    }
}

/// The pool was cancelled; no further units will start.
///
/// # Log Level
/// `warn!` - Potential issue
pub struct PoolCancelled<'a> {
    pub label: &'a str,
    pub reason: &'a str,
}

impl Display for PoolCancelled<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Cancelling {} pool: {}", self.label, self.reason)
    }
}

impl StructuredLog for PoolCancelled<'_> {
    fn log(&self) {
        tracing::warn!(pool = self.label, reason = self.reason, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("pool_cancelled", span_name = name, pool = self.label)
    }
}
