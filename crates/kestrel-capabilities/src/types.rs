// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Which external subsystem family a capability belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapabilityKind {
    /// A language server (diagnostics, no tools/prompts).
    Lsp,
    /// An MCP server (tools and prompts, no diagnostics).
    Mcp,
}

/// The lifecycle state of a tracked capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Disabled,
    Starting,
    Ready,
    Error,
}

/// A tool descriptor contributed by an MCP-style capability.
///
/// Mirrors [`kestrel_tools::ToolSchema`] but keeps this crate independent of
/// the tools crate — the Tool Runtime converts these at the seam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A single diagnostic contributed by an LSP-style capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    pub severity: DiagnosticSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Info,
    Hint,
}

/// A snapshot of one subsystem's lifecycle, as observed and republished by
/// the [`crate::CapabilityRegistry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityState {
    pub name: String,
    pub kind: CapabilityKind,
    pub state: LifecycleState,
    pub error: Option<String>,
    /// Number of tools exposed (MCP only; always 0 for LSP).
    pub tool_count: usize,
    /// Number of prompts exposed (MCP only; always 0 for LSP).
    pub prompt_count: usize,
}
