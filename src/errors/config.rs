// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;

/// Errors that can occur while validating a run configuration
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Two options were given that cannot be used together
    ConflictingOptions {
        first: String,
        second: String,
    },
    /// An option was given without the option it depends on
    MissingRequirement {
        option: String,
        requires: String,
    },
    /// A numeric option is outside its accepted range
    OutOfRange {
        option: String,
        value: String,
        expected: String,
    },
    /// A required string option is empty or not usable as a name
    InvalidName {
        option: String,
        value: String,
    },
    /// The band pattern could not be expanded
    InvalidBandPattern {
        pattern: String,
        reason: String,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::ConflictingOptions { first, second } => {
                write!(f, "Options '{}' and '{}' are mutually exclusive", first, second)
            }
            ValidationError::MissingRequirement { option, requires } => {
                write!(f, "Option '{}' requires '{}'", option, requires)
            }
            ValidationError::OutOfRange {
                option,
                value,
                expected,
            } => {
                write!(
                    f,
                    "Option '{}' has value {} but must be {}",
                    option, value, expected
                )
            }
            ValidationError::InvalidName { option, value } => {
                write!(f, "Option '{}' is not a valid name: '{}'", option, value)
            }
            ValidationError::InvalidBandPattern { pattern, reason } => {
                write!(f, "Band pattern '{}' is invalid: {}", pattern, reason)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Failure to load a configuration file.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse '{path}': {reason}")]
    Parse { path: String, reason: String },

    #[error("Unsupported configuration format '{0}' (expected .yaml, .yml or .toml)")]
    UnsupportedFormat(String),

    #[error("Configuration validation failed:\n{}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n"))]
    Invalid(Vec<ValidationError>),
}
