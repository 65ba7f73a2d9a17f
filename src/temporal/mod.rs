// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Temporal indexing: artifact name parsing, register entries, band
//! sub-datasets and the temporal-dataset stores.

pub mod indexer;
pub mod naming;
pub mod pattern;
pub mod store;

pub use indexer::{Partition, RegisterEntry, TemporalIndexer, REGISTER_TIME_FORMAT};
pub use naming::{ArtifactName, LayerKind};
pub use pattern::BandPattern;
pub use store::{DatasetDocument, FileTemporalStore, MemoryTemporalStore};
