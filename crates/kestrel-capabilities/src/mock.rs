// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::provider::CapabilityProvider;
use crate::types::{CapabilityKind, Diagnostic, LifecycleState, ToolDescriptor};

/// A controllable [`CapabilityProvider`] for tests. `start()` transitions
/// through `Starting` for `start_delay_ms` before landing on `Ready` or
/// `Error`, matching the shape of a real LSP/MCP subsystem without any
/// actual process or socket.
pub struct MockCapabilityProvider {
    name: String,
    kind: CapabilityKind,
    state: Mutex<LifecycleState>,
    start_delay_ms: u64,
    fail: bool,
    tools: Vec<String>,
    prompt_count: usize,
    restart_count: AtomicU32,
    start_count: AtomicUsize,
}

impl MockCapabilityProvider {
    /// A provider that is `Ready` immediately once started.
    pub fn ready(name: impl Into<String>, kind: CapabilityKind) -> Self {
        Self::new(name, kind, 0, false, Vec::new(), 0)
    }

    /// A provider that becomes `Ready` after `start_delay_ms` of simulated
    /// initialization work.
    pub fn slow_start(name: impl Into<String>, kind: CapabilityKind, start_delay_ms: u64) -> Self {
        Self::new(name, kind, start_delay_ms, false, Vec::new(), 0)
    }

    /// A provider whose `start()` always lands on `Error`.
    pub fn error(name: impl Into<String>, kind: CapabilityKind) -> Self {
        Self::new(name, kind, 0, true, Vec::new(), 0)
    }

    /// A `Ready` MCP provider exposing the given tool names.
    pub fn ready_with_tools(name: impl Into<String>, tools: Vec<String>) -> Self {
        Self::new(name, CapabilityKind::Mcp, 0, false, tools, 0)
    }

    fn new(
        name: impl Into<String>,
        kind: CapabilityKind,
        start_delay_ms: u64,
        fail: bool,
        tools: Vec<String>,
        prompt_count: usize,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            state: Mutex::new(LifecycleState::Disabled),
            start_delay_ms,
            fail,
            tools,
            prompt_count,
            restart_count: AtomicU32::new(0),
            start_count: AtomicUsize::new(0),
        }
    }

    /// Number of times [`CapabilityProvider::restart`] actually ran (as
    /// opposed to being intercepted as a no-op by the registry).
    pub fn restart_count(&self) -> u32 {
        self.restart_count.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> usize {
        self.start_count.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: LifecycleState) {
        *self.state.lock().unwrap() = state;
    }
}

#[async_trait]
impl CapabilityProvider for MockCapabilityProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CapabilityKind {
        self.kind
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.start_count.fetch_add(1, Ordering::SeqCst);
        self.set_state(LifecycleState::Starting);
        if self.start_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.start_delay_ms)).await;
        }
        self.set_state(if self.fail {
            LifecycleState::Error
        } else {
            LifecycleState::Ready
        });
        Ok(())
    }

    async fn restart(&self) -> anyhow::Result<()> {
        self.restart_count.fetch_add(1, Ordering::SeqCst);
        self.start().await
    }

    fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap()
    }

    fn last_error(&self) -> Option<String> {
        if self.fail && self.state() == LifecycleState::Error {
            Some(format!("{} failed to initialize", self.name))
        } else {
            None
        }
    }

    fn tool_schemas(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|name| ToolDescriptor {
                name: name.clone(),
                description: format!("mock tool {name}"),
                parameters: serde_json::json!({ "type": "object" }),
            })
            .collect()
    }

    fn prompt_count(&self) -> usize {
        self.prompt_count
    }

    fn diagnostics(&self) -> Vec<Diagnostic> {
        Vec::new()
    }
}
