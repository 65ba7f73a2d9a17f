// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Observability module for structured logging and tracing.
//!
//! This module provides centralized message types for all diagnostic and operational
//! logging throughout scenestack. Message types follow a struct-based pattern
//! with `Display` trait implementation to:
//!
//! * Eliminate magic strings scattered throughout the codebase
//! * Keep the human-readable text and the structured fields of an event together
//! * Provide consistent, structured logging output
//!
//! # Architecture
//!
//! Messages are organized by subsystem:
//! * `messages::engine` - worker pool lifecycle and per-unit progress
//! * `messages::budget` - concurrency and memory advisories
//! * `messages::reconcile` - fan-in of worker contexts into the shared namespace
//! * `messages::mask` - mask decisions, merges and area filtering
//! * `messages::temporal` - temporal dataset creation and registration
//!
//! # Usage
//!
//! ```rust
//! use scenestack::observability::messages::engine::UnitDispatched;
//! use scenestack::observability::messages::StructuredLog;
//!
//! let msg = UnitDispatched {
//!     unit_id: "S2_import_1",
//!     position: 1,
//!     total: 4,
//! };
//!
//! msg.log();
//! ```

pub mod messages;

use tracing_subscriber::EnvFilter;

/// Install the global `fmt` subscriber, filtered by `RUST_LOG` (default `info`).
///
/// Calling this more than once is harmless; later calls leave the first
/// subscriber in place.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
