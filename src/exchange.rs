//! JSON interchange for whole-vault import and export.
//!
//! Import is lenient: entries missing a title become "Untitled", missing
//! text becomes empty, and a missing or empty image reference becomes null.
//! Unknown fields are ignored so exports from other deployments (which carry
//! ids and owner fields) import cleanly.

use crate::core::{NewPrompt, Prompt, Result, VaultError};
use serde::Deserialize;

#[derive(Deserialize)]
struct ImportEntry {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
}

/// Parse a JSON array of records into the "new record" shape.
pub fn parse_json_import(content: &str) -> Result<Vec<NewPrompt>> {
    let entries: Vec<ImportEntry> = serde_json::from_str(content)
        .map_err(|e| VaultError::Serialization(format!("Malformed import document: {e}")))?;
    Ok(entries
        .into_iter()
        .map(|entry| NewPrompt {
            title: entry
                .title
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Untitled".to_string()),
            text: entry.text.unwrap_or_default(),
            image_url: entry.image_url.filter(|u| !u.is_empty()),
        })
        .collect())
}

/// Serialize the full record list for export.
pub fn export_json(prompts: &[Prompt]) -> Result<String> {
    serde_json::to_string_pretty(prompts)
        .map_err(|e| VaultError::Serialization(format!("Failed to serialize export: {e}")))
}
