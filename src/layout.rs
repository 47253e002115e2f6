use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::field::SignatureField;

/// Structural description of a document's fields. A layout never carries
/// fill state into a session: importing always resets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentLayout {
    #[serde(alias = "pdfUrl", default)]
    pub source_url: String,
    #[serde(default)]
    pub fields: Vec<SignatureField>,
}

impl DocumentLayout {
    pub fn new(source_url: impl Into<String>, fields: Vec<SignatureField>) -> Self {
        Self {
            source_url: source_url.into(),
            fields,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a layout and strip every field's fill state.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut layout: DocumentLayout = serde_json::from_str(json)?;
        for field in &mut layout.fields {
            field.clear();
        }
        Ok(layout)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        log::info!("Saved layout ({} fields) to {}", self.fields.len(), path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let layout = Self::from_json(&contents)?;
        log::info!("Loaded layout ({} fields) from {}", layout.fields.len(), path.display());
        Ok(layout)
    }
}

/// Default file name for a saved layout.
pub fn layout_file_name(timestamp_ms: i64) -> String {
    format!("document-layout-{}.json", timestamp_ms)
}
