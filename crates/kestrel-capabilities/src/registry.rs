// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kestrel_bus::{Bus, EventKind};
use tokio::sync::Mutex;
use tracing::warn;

use crate::provider::CapabilityProvider;
use crate::types::{CapabilityState, Diagnostic, LifecycleState, ToolDescriptor};

/// Polling interval used by [`CapabilityRegistry::wait_for_init`] while a
/// provider is still `Starting`.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Tracks the lifecycle of every registered LSP/MCP subsystem and republishes
/// state transitions on its [`Bus`]. Aggregates diagnostics (LSP) and
/// tools/prompts (MCP) into flat, provider-tagged lists for the Tool Runtime.
pub struct CapabilityRegistry {
    providers: Mutex<HashMap<String, Arc<dyn CapabilityProvider>>>,
    pub states: Bus<CapabilityState>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
            states: Bus::new(),
        }
    }

    /// Register a provider. Does not start it — call [`Self::start`] or
    /// [`Self::start_all`] once registration is complete.
    pub async fn register(&self, provider: Arc<dyn CapabilityProvider>) {
        self.providers
            .lock()
            .await
            .insert(provider.name().to_string(), provider);
    }

    /// Begin initializing one provider and publish its resulting state.
    pub async fn start(&self, name: &str) -> anyhow::Result<()> {
        let provider = self.get(name).await;
        let Some(provider) = provider else {
            anyhow::bail!("unknown capability: {name}");
        };
        provider.start().await?;
        self.publish_state(&provider);
        Ok(())
    }

    /// Begin initializing every registered provider concurrently.
    pub async fn start_all(&self) {
        let providers: Vec<_> = self.providers.lock().await.values().cloned().collect();
        let registry_states: Vec<_> = providers
            .iter()
            .map(|p| async {
                if let Err(e) = p.start().await {
                    warn!(capability = p.name(), error = %e, "capability failed to start");
                }
                state_of(p.as_ref())
            })
            .collect();
        for state in futures::future::join_all(registry_states).await {
            self.states.publish(EventKind::Updated, state);
        }
    }

    /// Idempotent restart: a restart issued while a provider is already
    /// `Starting` is a no-op.
    pub async fn restart(&self, name: &str) -> anyhow::Result<()> {
        let Some(provider) = self.get(name).await else {
            anyhow::bail!("unknown capability: {name}");
        };
        if provider.state() == LifecycleState::Starting {
            return Ok(());
        }
        provider.restart().await?;
        self.publish_state(&provider);
        Ok(())
    }

    /// Block until `name` leaves the `Starting` state, or `timeout` elapses.
    pub async fn wait_for_init(&self, name: &str, timeout: Duration) -> anyhow::Result<LifecycleState> {
        let Some(provider) = self.get(name).await else {
            anyhow::bail!("unknown capability: {name}");
        };
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let state = provider.state();
            if state != LifecycleState::Starting {
                return Ok(state);
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("timed out waiting for {name} to initialize");
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Snapshot of every registered provider's current state.
    pub async fn states(&self) -> Vec<CapabilityState> {
        let providers = self.providers.lock().await;
        let mut states: Vec<_> = providers.values().map(|p| state_of(p.as_ref())).collect();
        states.sort_by(|a, b| a.name.cmp(&b.name));
        states
    }

    /// All tools contributed by `Ready` MCP providers.
    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        let providers = self.providers.lock().await;
        providers
            .values()
            .filter(|p| p.state() == LifecycleState::Ready)
            .flat_map(|p| p.tool_schemas())
            .collect()
    }

    /// All diagnostics contributed by `Ready` LSP providers.
    pub async fn diagnostics(&self) -> Vec<Diagnostic> {
        let providers = self.providers.lock().await;
        providers
            .values()
            .filter(|p| p.state() == LifecycleState::Ready)
            .flat_map(|p| p.diagnostics())
            .collect()
    }

    async fn get(&self, name: &str) -> Option<Arc<dyn CapabilityProvider>> {
        self.providers.lock().await.get(name).cloned()
    }

    fn publish_state(&self, provider: &Arc<dyn CapabilityProvider>) {
        self.states
            .publish(EventKind::Updated, state_of(provider.as_ref()));
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn state_of(provider: &dyn CapabilityProvider) -> CapabilityState {
    CapabilityState {
        name: provider.name().to_string(),
        kind: provider.kind(),
        state: provider.state(),
        error: provider.last_error(),
        tool_count: provider.tool_schemas().len(),
        prompt_count: provider.prompt_count(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mock::MockCapabilityProvider;
    use crate::types::CapabilityKind;

    #[tokio::test]
    async fn register_and_start_publishes_ready_state() {
        let reg = CapabilityRegistry::new();
        let mut sub = reg.states.subscribe();
        let provider = Arc::new(MockCapabilityProvider::ready("lsp-rust", CapabilityKind::Lsp));
        reg.register(provider).await;
        reg.start("lsp-rust").await.unwrap();

        let event = sub.recv().await.unwrap();
        assert_eq!(event.payload.name, "lsp-rust");
        assert_eq!(event.payload.state, LifecycleState::Ready);
    }

    #[tokio::test]
    async fn unknown_capability_start_errors() {
        let reg = CapabilityRegistry::new();
        assert!(reg.start("nope").await.is_err());
    }

    #[tokio::test]
    async fn wait_for_init_resolves_once_ready() {
        let reg = CapabilityRegistry::new();
        let provider = Arc::new(MockCapabilityProvider::slow_start("mcp-fs", CapabilityKind::Mcp, 2));
        reg.register(provider.clone()).await;
        tokio::spawn(async move {
            let _ = provider.start().await;
        });
        let state = reg.wait_for_init("mcp-fs", Duration::from_secs(2)).await.unwrap();
        assert_eq!(state, LifecycleState::Ready);
    }

    #[tokio::test]
    async fn restart_while_starting_is_noop() {
        let reg = CapabilityRegistry::new();
        let provider = Arc::new(MockCapabilityProvider::slow_start("mcp-slow", CapabilityKind::Mcp, 50));
        reg.register(provider.clone()).await;
        let p2 = provider.clone();
        tokio::spawn(async move { let _ = p2.start().await; });
        tokio::task::yield_now().await;
        assert_eq!(provider.state(), LifecycleState::Starting);
        reg.restart("mcp-slow").await.unwrap();
        assert_eq!(provider.restart_count(), 0, "restart during Starting must be a no-op");
    }

    #[tokio::test]
    async fn tools_aggregates_only_ready_mcp_providers() {
        let reg = CapabilityRegistry::new();
        reg.register(Arc::new(MockCapabilityProvider::ready_with_tools(
            "mcp-a",
            vec!["read".into(), "write".into()],
        )))
        .await;
        reg.register(Arc::new(MockCapabilityProvider::error("mcp-b", CapabilityKind::Mcp)))
            .await;
        reg.start("mcp-a").await.unwrap();
        let tools = reg.tools().await;
        assert_eq!(tools.len(), 2);
    }

    #[tokio::test]
    async fn states_returns_sorted_snapshot() {
        let reg = CapabilityRegistry::new();
        reg.register(Arc::new(MockCapabilityProvider::ready("zeta", CapabilityKind::Lsp)))
            .await;
        reg.register(Arc::new(MockCapabilityProvider::ready("alpha", CapabilityKind::Lsp)))
            .await;
        let names: Vec<_> = reg.states().await.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
