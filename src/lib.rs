// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod backends;   // external and in-process processing steps
pub mod budget;     // worker count + memory per worker
pub mod config;     // config loading, validation, runtime
pub mod engine;     // isolated worker pool + reconciler
pub mod errors;     // error handling
pub mod mask;       // cloud/shadow masks and same-date merging
pub mod observability;
pub mod pipeline;   // import and mask runs
pub mod temporal;   // artifact naming, indexing, dataset stores
pub mod traits;     // seams to steps and stores
pub mod workspace;  // namespaces, worker contexts, cleanup
