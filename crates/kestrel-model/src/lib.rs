// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Uniform streaming interface over a remote model.
//!
//! This crate deliberately does not implement any concrete provider wire
//! format (request shaping, auth headers, SSE framing). It defines the
//! contract the orchestration core consumes — [`ModelProvider`] — plus the
//! message/event types that cross that boundary, and a deterministic
//! [`MockProvider`]/[`ScriptedMockProvider`] pair used to exercise the core
//! end to end without network access.
pub mod catalog;
pub mod sanitize;
mod types;
mod provider;
mod mock;

pub use catalog::{ModelCatalogEntry, InputModality};
pub use types::*;
pub use provider::{ModelProvider, ResponseStream};
pub use mock::{MockProvider, ScriptedMockProvider};

use std::sync::Arc;

use kestrel_config::ModelConfig;

/// Construct a [`ModelProvider`] from configuration.
///
/// Only the `mock` driver is built in: a real deployment registers concrete
/// provider drivers (OpenAI-, Anthropic-, or Gemini-compatible wire formats)
/// behind this same factory, external to this crate.
pub fn from_config(cfg: &ModelConfig) -> anyhow::Result<Arc<dyn ModelProvider>> {
    match cfg.provider.as_str() {
        "mock" => {
            if let Some(path) = &cfg.mock_responses_file {
                let text = std::fs::read_to_string(path)?;
                let scripts: Vec<Vec<ResponseEvent>> = serde_yaml::from_str(&text)?;
                Ok(Arc::new(ScriptedMockProvider::new(scripts)))
            } else {
                Ok(Arc::new(MockProvider))
            }
        }
        other => anyhow::bail!(
            "unknown or unregistered model provider: {other} (only 'mock' is built into this crate)"
        ),
    }
}
