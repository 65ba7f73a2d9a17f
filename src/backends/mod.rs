// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod command;
pub mod stub;

pub use command::{CommandStep, StepPrograms};
pub use stub::{FailingStep, StubStep};
