// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use crate::types::{CapabilityKind, Diagnostic, LifecycleState, ToolDescriptor};

/// A capability subsystem the registry tracks — a language server or an MCP
/// server. The concrete transport (spawning `rust-analyzer`, speaking
/// stdio JSON-RPC to an MCP server) is out of scope for this crate; it lives
/// behind this trait so the registry only ever sees lifecycle state and an
/// inventory of tools/prompts/diagnostics.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> CapabilityKind;

    /// Begin initialization. Returns once the provider has transitioned out
    /// of `Starting` (either `Ready` or `Error`), or immediately if already
    /// past `Starting`.
    async fn start(&self) -> anyhow::Result<()>;

    /// Restart the subsystem. Idempotent: calling this while already
    /// `Starting` is a no-op.
    async fn restart(&self) -> anyhow::Result<()>;

    fn state(&self) -> LifecycleState;
    fn last_error(&self) -> Option<String> {
        None
    }

    /// Tools contributed to the Tool Runtime (MCP providers only).
    fn tool_schemas(&self) -> Vec<ToolDescriptor> {
        Vec::new()
    }
    /// Number of prompts exposed (MCP providers only).
    fn prompt_count(&self) -> usize {
        0
    }
    /// Current diagnostics (LSP providers only).
    fn diagnostics(&self) -> Vec<Diagnostic> {
        Vec::new()
    }
}
