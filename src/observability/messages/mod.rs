// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Centralized message types for structured logging.
//!
//! Each message type implements `Display` for consistent human-readable output.
//! Messages that are emitted as operational events also implement
//! [`StructuredLog`], which attaches the message's fields to the tracing event
//! at the level documented on the type.
//!
//! # Organization
//!
//! * `engine` - worker pool lifecycle and per-unit progress
//! * `budget` - resource advisories
//! * `reconcile` - reconciliation of worker contexts
//! * `mask` - mask computation decisions and merges
//! * `temporal` - dataset creation and registration

pub mod budget;
pub mod engine;
pub mod mask;
pub mod reconcile;
pub mod temporal;

use tracing::Span;

/// A message that knows how to emit itself as a structured tracing event.
pub trait StructuredLog {
    /// Emit the event at the message's documented level.
    fn log(&self);

    /// Build a span carrying the same fields, named `name`.
    fn span(&self, name: &str) -> Span;
}
