// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Model catalog: static metadata for known models, with optional live refresh.

use serde::{Deserialize, Serialize};

/// Input modalities supported by a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputModality {
    Text,
    Image,
}

fn default_input_modalities() -> Vec<InputModality> {
    // Conservative default: text only.
    vec![InputModality::Text]
}

/// Metadata for a single model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelCatalogEntry {
    /// Provider-scoped model identifier.
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// Provider identifier, e.g. "mock", "local".
    pub provider: String,
    /// Total context window in tokens (input + output).
    pub context_window: u32,
    /// Maximum output tokens per completion.
    pub max_output_tokens: u32,
    /// Short description.
    #[serde(default)]
    pub description: String,
    /// Supported input modalities.  Defaults to `[text]`.
    #[serde(default = "default_input_modalities")]
    pub input_modalities: Vec<InputModality>,
}

impl ModelCatalogEntry {
    /// Return `true` if the model can accept image input.
    pub fn supports_images(&self) -> bool {
        self.input_modalities.contains(&InputModality::Image)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    models: Vec<ModelCatalogEntry>,
}

/// Return all entries from the bundled static catalog.
pub fn static_catalog() -> Vec<ModelCatalogEntry> {
    let yaml = include_str!("../catalog.yaml");
    let catalog: CatalogFile =
        serde_yaml::from_str(yaml).expect("bundled catalog.yaml must be valid");
    catalog.models
}

/// Look up a single model by provider and id (or name).
pub fn lookup(provider: &str, model_id: &str) -> Option<ModelCatalogEntry> {
    static_catalog()
        .into_iter()
        .find(|e| e.provider == provider && (e.id == model_id || e.name == model_id))
}

/// Look up a model by bare model name (without provider prefix).
pub fn lookup_by_model_name(model_name: &str) -> Option<ModelCatalogEntry> {
    static_catalog()
        .into_iter()
        .find(|e| e.id == model_name || e.name == model_name)
}

/// Return `true` if the model supports image input, defaulting to `false` when
/// the model is not found in the catalog.
pub fn supports_images(provider: &str, model_id: &str) -> bool {
    lookup(provider, model_id)
        .map(|e| e.supports_images())
        .unwrap_or(false)
}

/// Look up the context window for a model.  Falls back to `default` if not in catalog.
pub fn context_window(provider: &str, model_id: &str, default: u32) -> u32 {
    lookup(provider, model_id)
        .map(|e| e.context_window)
        .unwrap_or(default)
}

/// Look up the max output tokens for a model.  Falls back to `default` if not in catalog.
pub fn max_output_tokens(provider: &str, model_id: &str, default: u32) -> u32 {
    lookup(provider, model_id)
        .map(|e| e.max_output_tokens)
        .unwrap_or(default)
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_catalog_is_non_empty() {
        let models = static_catalog();
        assert!(
            !models.is_empty(),
            "bundled catalog must contain at least one model"
        );
    }

    #[test]
    fn mock_model_is_in_catalog() {
        let entry = lookup("mock", "mock-model").expect("mock-model must be in catalog");
        assert_eq!(entry.provider, "mock");
        assert!(entry.context_window >= 4096);
    }

    #[test]
    fn local_large_supports_images() {
        let entry = lookup("local", "local-large").unwrap();
        assert!(entry.supports_images());
    }

    #[test]
    fn local_small_is_text_only() {
        let entry = lookup("local", "local-small").unwrap();
        assert!(!entry.supports_images());
    }

    #[test]
    fn lookup_unknown_model_returns_none() {
        assert!(lookup("mock", "nonexistent-model-xyz").is_none());
    }

    #[test]
    fn context_window_fallback_used_when_unknown() {
        let cw = context_window("mock", "no-such-model", 4096);
        assert_eq!(cw, 4096);
    }

    #[test]
    fn all_entries_have_non_zero_windows() {
        for entry in static_catalog() {
            assert!(entry.context_window > 0, "{} has zero context_window", entry.id);
            assert!(
                entry.max_output_tokens > 0,
                "{} has zero max_output_tokens",
                entry.id
            );
        }
    }

    #[test]
    fn all_entries_have_at_least_text_modality() {
        for entry in static_catalog() {
            assert!(
                entry.input_modalities.contains(&InputModality::Text),
                "{} ({}) missing text modality",
                entry.id,
                entry.provider,
            );
        }
    }
}
