// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Positional tokenizer for artifact names.
//!
//! Names follow `{prefix}_{YYYYMMDDTHHMMSS}_{band_or_kind}[_...]`, e.g.
//! `T32UMA_20210615T103021_B04_10m`. Names are validated once here and every
//! later stage works on the parsed [`ArtifactName`].

use chrono::NaiveDateTime;

use crate::errors::{PipelineError, PipelineResult};

const SEPARATOR: char = '_';
const STAMP_LEN: usize = 15;
const DATE_TIME_SEPARATOR: u8 = b'T';

/// Whether an artifact holds a band or a derived mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LayerKind {
    Band,
    Mask,
}

impl LayerKind {
    /// Masks are recognised by a `clouds` or `shadows` token, in any case.
    pub fn of(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.contains("clouds") || lower.contains("shadows") {
            LayerKind::Mask
        } else {
            LayerKind::Band
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    raw: String,
    prefix: String,
    band: String,
    /// `YYYY-MM-DD`, sliced from the name.
    date: String,
    /// `HH:MM:SS`, sliced from the name.
    time: String,
    timestamp: NaiveDateTime,
}

impl ArtifactName {
    pub fn parse(name: &str) -> PipelineResult<Self> {
        let malformed = |reason: &str| PipelineError::MalformedArtifactName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let segments: Vec<&str> = name.split(SEPARATOR).collect();
        if segments.len() < 3 {
            return Err(malformed(
                "expected at least 3 '_'-separated segments ({prefix}_{YYYYMMDDTHHMMSS}_{band})",
            ));
        }
        let (prefix, stamp, band) = (segments[0], segments[1], segments[2]);
        if prefix.is_empty() || band.is_empty() {
            return Err(malformed("prefix and band segments must not be empty"));
        }

        let bytes = stamp.as_bytes();
        if bytes.len() != STAMP_LEN {
            return Err(malformed("timestamp segment must be 15 characters (YYYYMMDDTHHMMSS)"));
        }
        if bytes[8] != DATE_TIME_SEPARATOR {
            return Err(malformed("timestamp segment must have 'T' between date and time"));
        }
        if !bytes[..8]
            .iter()
            .chain(&bytes[9..])
            .all(u8::is_ascii_digit)
        {
            return Err(malformed("timestamp segment must be digits around 'T'"));
        }

        // All bytes are ASCII from here on, so byte slicing is char-aligned.
        let date = format!("{}-{}-{}", &stamp[0..4], &stamp[4..6], &stamp[6..8]);
        let time = format!("{}:{}:{}", &stamp[9..11], &stamp[11..13], &stamp[13..15]);
        let timestamp = NaiveDateTime::parse_from_str(stamp, "%Y%m%dT%H%M%S")
            .map_err(|_| malformed("timestamp segment is not a valid calendar date and time"))?;

        Ok(Self {
            raw: name.to_string(),
            prefix: prefix.to_string(),
            band: band.to_string(),
            date,
            time,
            timestamp,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Third segment: band token (`B04`) or kind token (`CLOUDS`).
    pub fn band(&self) -> &str {
        &self.band
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn time(&self) -> &str {
        &self.time
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    /// `{prefix}_{YYYYMMDDTHHMMSS}`, shared by every layer of one scene.
    pub fn scene(&self) -> String {
        let stamp_end = self.prefix.len() + 1 + STAMP_LEN;
        self.raw[..stamp_end].to_string()
    }

    pub fn layer_kind(&self) -> LayerKind {
        LayerKind::of(&self.raw)
    }

    /// `S2_{band}` with the band's leading `B0`/`B` removed (`B04` -> `S2_4`,
    /// `B8A` -> `S2_8A`).
    pub fn semantic_label(&self) -> String {
        format!("S2_{}", self.band.replace("B0", "").replace('B', ""))
    }
}
