// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for concurrency and memory advisories.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// More workers were requested than the host has CPUs.
///
/// # Log Level
/// `warn!` - Potential issue
///
/// # Example
/// ```
/// use scenestack::observability::messages::budget::CpuOversubscribed;
///
/// let msg = CpuOversubscribed { requested: 16, available: 8 };
/// assert_eq!(
///     msg.to_string(),
///     "Using 16 parallel workers but only 8 CPUs available"
/// );
/// ```
pub struct CpuOversubscribed {
    pub requested: usize,
    pub available: usize,
}

impl Display for CpuOversubscribed {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Using {} parallel workers but only {} CPUs available",
            self.requested, self.available
        )
    }
}

impl StructuredLog for CpuOversubscribed {
    fn log(&self) {
        tracing::warn!(
            requested = self.requested,
            available = self.available,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "cpu_oversubscribed",
            span_name = name,
            requested = self.requested,
            available = self.available,
        )
    }
}

/// The pipeline elected to clamp workers to the CPU count.
///
/// # Log Level
/// `warn!` - Potential issue
pub struct WorkersClamped {
    pub requested: usize,
    pub clamped_to: usize,
}

impl Display for WorkersClamped {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Setting parallel workers from {} to {}",
            self.requested, self.clamped_to
        )
    }
}

impl StructuredLog for WorkersClamped {
    fn log(&self) {
        tracing::warn!(
            requested = self.requested,
            clamped_to = self.clamped_to,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("workers_clamped", span_name = name, clamped_to = self.clamped_to)
    }
}

/// The memory budget was reduced to what the host has free.
///
/// # Log Level
/// `warn!` - Potential issue
pub struct MemoryClamped {
    pub requested_mb: u64,
    pub available_mb: u64,
}

impl Display for MemoryClamped {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Using {} MB but only {} MB RAM available; memory set to {} MB",
            self.requested_mb, self.available_mb, self.available_mb
        )
    }
}

impl StructuredLog for MemoryClamped {
    fn log(&self) {
        tracing::warn!(
            requested_mb = self.requested_mb,
            available_mb = self.available_mb,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "memory_clamped",
            span_name = name,
            available_mb = self.available_mb,
        )
    }
}
