// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `kestrel-capabilities` — Capability Registry for kestrel's core.
//!
//! Tracks external LSP and MCP subsystems as [`CapabilityProvider`]s: each
//! provider owns its own connection/process lifecycle, and this crate only
//! ever observes lifecycle state and republishes it on a [`kestrel_bus::Bus`].
//! The Tool Runtime reads the registry's aggregated tool/diagnostic inventory
//! rather than talking to any subsystem directly.
//!
//! The concrete LSP and MCP client transports (spawning `rust-analyzer`,
//! speaking stdio JSON-RPC to an MCP server) are out of scope for this crate;
//! production providers implement [`CapabilityProvider`] and are registered
//! by `kestrel-bootstrap`. [`MockCapabilityProvider`] stands in for tests.

pub mod mock;
pub mod provider;
pub mod registry;
pub mod types;

pub use mock::MockCapabilityProvider;
pub use provider::CapabilityProvider;
pub use registry::CapabilityRegistry;
pub use types::{
    CapabilityKind, CapabilityState, Diagnostic, DiagnosticSeverity, LifecycleState,
    ToolDescriptor,
};
