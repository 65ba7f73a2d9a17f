// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;

use crate::errors::{PipelineError, PipelineResult};
use crate::traits::MetadataStore;

pub const METADATA_FILE: &str = "description.json";
pub const CLOUD_PERCENTAGE_FIELD: &str = "CLOUDY_PIXEL_PERCENTAGE";

/// Scene metadata as `{dir}/{layer}/description.json` documents, the layout
/// the import step leaves behind.
#[derive(Debug, Clone)]
pub struct JsonMetadataStore {
    dir: PathBuf,
}

impl JsonMetadataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl MetadataStore for JsonMetadataStore {
    async fn cloud_percentage(&self, layer: &str) -> PipelineResult<f64> {
        let unavailable = |reason: String| PipelineError::Metadata {
            layer: layer.to_string(),
            reason,
        };

        let path = self.document_path(layer);
        let raw = tokio::fs::read(&path)
            .await
            .map_err(|e| unavailable(format!("{}: {}", path.display(), e)))?;
        let document: Value = serde_json::from_slice(&raw)
            .map_err(|e| unavailable(format!("{}: {}", path.display(), e)))?;

        // Written as a number or as a numeric string depending on the product.
        match document.get(CLOUD_PERCENTAGE_FIELD) {
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| unavailable(format!("{} is not finite", CLOUD_PERCENTAGE_FIELD))),
            Some(Value::String(s)) => s.trim().parse::<f64>().map_err(|_| {
                unavailable(format!("{} is not a number: '{}'", CLOUD_PERCENTAGE_FIELD, s))
            }),
            Some(_) => Err(unavailable(format!(
                "{} is not a number",
                CLOUD_PERCENTAGE_FIELD
            ))),
            None => Err(unavailable(format!("{} is missing", CLOUD_PERCENTAGE_FIELD))),
        }
    }

    fn document_path(&self, layer: &str) -> PathBuf {
        self.dir.join(layer).join(METADATA_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write_document(dir: &TempDir, layer: &str, body: &str) {
        let folder = dir.path().join(layer);
        tokio::fs::create_dir_all(&folder).await.unwrap();
        tokio::fs::write(folder.join(METADATA_FILE), body).await.unwrap();
    }

    #[tokio::test]
    async fn reads_numeric_and_string_percentages() {
        let dir = TempDir::new().unwrap();
        write_document(&dir, "a_B02", r#"{"CLOUDY_PIXEL_PERCENTAGE": 12.5}"#).await;
        write_document(&dir, "b_B02", r#"{"CLOUDY_PIXEL_PERCENTAGE": "3.25"}"#).await;
        let store = JsonMetadataStore::new(dir.path());

        assert_eq!(store.cloud_percentage("a_B02").await.unwrap(), 12.5);
        assert_eq!(store.cloud_percentage("b_B02").await.unwrap(), 3.25);
    }

    #[tokio::test]
    async fn missing_document_or_field_is_an_error() {
        let dir = TempDir::new().unwrap();
        write_document(&dir, "a_B02", r#"{"SPACECRAFT_NAME": "Sentinel-2A"}"#).await;
        let store = JsonMetadataStore::new(dir.path());

        assert!(matches!(
            store.cloud_percentage("a_B02").await,
            Err(PipelineError::Metadata { .. })
        ));
        assert!(matches!(
            store.cloud_percentage("absent").await,
            Err(PipelineError::Metadata { .. })
        ));
    }

    #[test]
    fn document_path_nests_by_layer() {
        let store = JsonMetadataStore::new("/data/cell_misc");
        assert_eq!(
            store.document_path("T32UMA_20210615T103021_B02_10m"),
            PathBuf::from("/data/cell_misc/T32UMA_20210615T103021_B02_10m/description.json")
        );
    }
}
