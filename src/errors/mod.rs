// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod config;
mod pipeline;
mod step;

pub use config::{ConfigError, ValidationError};
pub use pipeline::{PipelineError, PipelineResult};
pub use step::{FailureStrategy, StepError, UnitFailure};
