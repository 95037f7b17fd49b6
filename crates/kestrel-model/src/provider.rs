// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;

use crate::{
    catalog::{InputModality, ModelCatalogEntry},
    CompletionRequest, GenerateResponse, ResponseEvent, ToolCallEvent,
};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    ///
    /// This is the main path: the Coordinator consumes `StreamPart`-shaped
    /// events as they arrive instead of waiting for the full reply.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;

    /// One-shot completion: drains the stream returned by [`Self::complete`]
    /// into a single aggregated [`GenerateResponse`].
    ///
    /// Rarely used — session titling and compaction summaries call this
    /// instead of `complete` because they have no use for incremental
    /// deltas. The default implementation reuses `complete` rather than
    /// requiring providers to implement a second wire path.
    async fn generate(&self, req: CompletionRequest) -> anyhow::Result<GenerateResponse> {
        let mut stream = self.complete(req).await?;
        let mut text = String::new();
        let mut calls: HashMap<String, ToolCallEvent> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut usage = crate::Usage::default();

        while let Some(event) = stream.next().await {
            match event? {
                ResponseEvent::TextDelta(delta) => text.push_str(&delta),
                ResponseEvent::ToolCall { id, name, arguments } => {
                    if !calls.contains_key(&id) {
                        order.push(id.clone());
                    }
                    calls.insert(id.clone(), ToolCallEvent { id, name, arguments });
                }
                ResponseEvent::ThinkingDelta(_) => {}
                ResponseEvent::Usage {
                    input_tokens,
                    output_tokens,
                    cache_read_tokens,
                    cache_write_tokens,
                } => {
                    usage = crate::Usage {
                        input_tokens,
                        output_tokens,
                        cache_read_tokens,
                        cache_write_tokens,
                    };
                }
                ResponseEvent::Done => break,
                ResponseEvent::Error(msg) => anyhow::bail!("model provider error: {msg}"),
            }
        }

        let tool_calls = order
            .into_iter()
            .filter_map(|id| calls.remove(&id))
            .collect();

        Ok(GenerateResponse {
            text,
            tool_calls,
            usage,
        })
    }

    /// List all models available from this provider.
    ///
    /// The default implementation returns only the static catalog entries for
    /// this provider.  Override to perform a live API query (and then merge
    /// with the catalog for metadata enrichment).
    async fn list_models(&self) -> anyhow::Result<Vec<ModelCatalogEntry>> {
        let provider = self.name();
        let entries = crate::catalog::static_catalog()
            .into_iter()
            .filter(|e| e.provider == provider)
            .collect();
        Ok(entries)
    }

    /// Maximum output tokens for this provider/model combination.
    ///
    /// Reads from the static catalog; returns `None` if the model is unknown.
    fn catalog_max_output_tokens(&self) -> Option<u32> {
        crate::catalog::lookup(self.name(), self.model_name()).map(|e| e.max_output_tokens)
    }

    /// Context window size for this provider/model combination.
    ///
    /// Reads from the static catalog; returns `None` if the model is unknown.
    fn catalog_context_window(&self) -> Option<u32> {
        crate::catalog::lookup(self.name(), self.model_name()).map(|e| e.context_window)
    }

    /// Query the live API for the actual context window in use.
    ///
    /// Default implementation returns `None` (no live probe available).
    /// Override in providers that expose a properties or info endpoint —
    /// e.g. llama.cpp-compatible servers expose `GET /props` which includes
    /// the loaded `n_ctx` value.
    ///
    /// Returns `Some(n_ctx)` when the probe succeeds, `None` otherwise.
    /// A `Some(0)` result is treated as "unknown" by callers.
    async fn probe_context_window(&self) -> Option<u32> {
        None
    }

    /// Input modalities supported by this provider/model combination.
    ///
    /// Reads from the static catalog.  Returns `[Text]` when the model is not
    /// found, to be conservative (avoid sending images to unknown models).
    fn input_modalities(&self) -> Vec<InputModality> {
        crate::catalog::lookup(self.name(), self.model_name())
            .map(|e| e.input_modalities)
            .unwrap_or_else(|| vec![InputModality::Text])
    }

    /// Returns `true` if this model supports image input.
    fn supports_images(&self) -> bool {
        self.input_modalities().contains(&InputModality::Image)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use crate::{Message, MockProvider, ScriptedMockProvider};

    use super::*;

    fn request(text: &str) -> CompletionRequest {
        CompletionRequest {
            messages: vec![Message::user(text)],
            tools: Vec::new(),
            stream: false,
            system_dynamic_suffix: None,
        }
    }

    #[tokio::test]
    async fn generate_aggregates_text_and_usage_from_mock_provider() {
        let provider = MockProvider;
        let resp = provider.generate(request("hello")).await.unwrap();
        assert_eq!(resp.text, "MOCK: hello");
        assert_eq!(resp.usage.input_tokens, 10);
        assert!(resp.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn generate_merges_tool_call_deltas_by_id() {
        let provider = ScriptedMockProvider::new(vec![vec![
            ResponseEvent::ToolCall {
                id: "call-1".into(),
                name: "shell".into(),
                arguments: "{\"cmd\":".into(),
            },
            ResponseEvent::ToolCall {
                id: "call-1".into(),
                name: "shell".into(),
                arguments: "{\"cmd\":\"ls\"}".into(),
            },
            ResponseEvent::Usage {
                input_tokens: 1,
                output_tokens: 2,
                cache_read_tokens: 0,
                cache_write_tokens: 0,
            },
            ResponseEvent::Done,
        ]]);
        let resp = provider.generate(request("run ls")).await.unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].arguments, "{\"cmd\":\"ls\"}");
    }

    #[tokio::test]
    async fn generate_propagates_stream_error() {
        let provider = ScriptedMockProvider::new(vec![vec![ResponseEvent::Error(
            "upstream failure".into(),
        )]]);
        let err = provider.generate(request("boom")).await.unwrap_err();
        assert!(err.to_string().contains("upstream failure"));
    }
}
