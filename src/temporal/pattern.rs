// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use regex::Regex;

use crate::errors::ValidationError;
use crate::temporal::indexer::RegisterEntry;

/// Band pattern with at most one alternation group, e.g. `B(02|03|8A)_10m`
/// or `B02_10m|B03_10m`.
///
/// This is not a pattern language: every option expands to one literal band
/// token, and sub-datasets are plain substring filters on artifact names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandPattern {
    raw: String,
    bands: Vec<String>,
}

impl BandPattern {
    pub fn parse(pattern: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidBandPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let bands: Vec<String> = if pattern.contains(['(', ')']) {
            let group = Regex::new(r"^([^()]*)\(([^()]*)\)([^()]*)$")
                .map_err(|e| invalid(&e.to_string()))?;
            let captures = group
                .captures(pattern)
                .ok_or_else(|| invalid("expected exactly one balanced '(...)' group"))?;
            let before = &captures[1];
            let after = &captures[3];
            captures[2]
                .split('|')
                .map(|option| format!("{}{}{}", before, option, after))
                .collect()
        } else {
            pattern.split('|').map(str::to_string).collect()
        };

        if bands.iter().any(|b| b.is_empty()) || pattern.contains("()") {
            return Err(invalid("empty band option"));
        }

        Ok(Self {
            raw: pattern.to_string(),
            bands,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn bands(&self) -> &[String] {
        &self.bands
    }

    /// Band tokens after resampling to 10 m: `20`/`60` become `10`.
    pub fn resampled(&self) -> Self {
        let bands = self
            .bands
            .iter()
            .map(|band| {
                if band.contains("20") || band.contains("60") {
                    band.replace("20", "10").replace("60", "10")
                } else {
                    band.clone()
                }
            })
            .collect();
        Self {
            raw: self.raw.clone(),
            bands,
        }
    }

    /// Entries whose artifact name contains `band`.
    pub fn filter(band: &str, entries: &[RegisterEntry]) -> Vec<RegisterEntry> {
        entries
            .iter()
            .filter(|entry| entry.artifact.contains(band))
            .cloned()
            .collect()
    }

    /// `({output}_{band}, matching entries)` for every band, in pattern order.
    pub fn sub_datasets(
        &self,
        output: &str,
        entries: &[RegisterEntry],
    ) -> Vec<(String, Vec<RegisterEntry>)> {
        self.bands
            .iter()
            .map(|band| (format!("{}_{}", output, band), Self::filter(band, entries)))
            .collect()
    }
}
