// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Centralised tool-registry builder.
//!
//! All callers (CI runner, conversation runner, TUI, sub-agents) use
//! `build_tool_registry` with the appropriate [`ToolSetProfile`] instead of
//! each inlining their own registration loop.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use kestrel_config::{AgentMode, Config};
use kestrel_model::ModelProvider;
use kestrel_tools::{
    events::ToolEvent, DeleteFileTool, EditFileTool, GlobTool, GrepTool, ListDirTool,
    ReadFileTool, ShellTool, SwitchModeTool, TodoWriteTool, ToolRegistry, WebFetchTool, WriteTool,
};

use kestrel_core::AgentRuntimeContext;

use crate::context::ToolSetProfile;
use crate::task_tool::{AgentTool, AgenticFetchTool};

/// Build a [`ToolRegistry`] populated according to the given `profile`.
///
/// This is the single canonical place where tools are wired up.  Adding a
/// new tool means adding it here once and it will appear in every
/// appropriate profile automatically.
///
/// ### Shared-state parameters
///
/// * `mode_lock` — the **same** `Arc` that will be passed to `Agent::new()`.
///   `SwitchModeTool` holds a clone so that mode changes are immediately
///   visible to the agent loop via `drain_tool_events`.
/// * `tool_event_tx` — the sending half of the channel whose receiving end
///   is passed to `Agent::new()`.  `TodoWriteTool` and `SwitchModeTool` send
///   events here; the agent drains them after each tool execution.
/// * `sub_agent_runtime` — inherited by `AgentTool` sub-agents (project root,
///   CI/git notes, AGENTS.md).  Only used for the `Full` profile; pass
///   `AgentRuntimeContext::default()` otherwise.
pub fn build_tool_registry(
    cfg: &Config,
    model: Arc<dyn ModelProvider>,
    profile: ToolSetProfile,
    mode_lock: Arc<Mutex<AgentMode>>,
    tool_event_tx: mpsc::Sender<ToolEvent>,
    sub_agent_runtime: AgentRuntimeContext,
) -> ToolRegistry {
    match profile {
        ToolSetProfile::Full { todos, task_depth } => {
            let mut reg = ToolRegistry::new();

            reg.register(ReadFileTool);
            reg.register(ListDirTool);
            reg.register(GlobTool);
            reg.register(GrepTool);
            reg.register(WebFetchTool);
            reg.register(AgenticFetchTool::new(model.clone()));
            reg.register(TodoWriteTool::new(todos, tool_event_tx.clone()));
            reg.register(SwitchModeTool::new(mode_lock, tool_event_tx));
            reg.register(WriteTool);
            reg.register(EditFileTool);
            reg.register(DeleteFileTool);
            reg.register(ShellTool {
                timeout_secs: cfg.tools.timeout_secs,
            });
            reg.register(AgentTool::new(
                model,
                Arc::new(cfg.clone()),
                task_depth,
                sub_agent_runtime,
            ));

            reg
        }

        ToolSetProfile::SubAgent { todos } => {
            let mut reg = ToolRegistry::new();

            reg.register(ReadFileTool);
            reg.register(ListDirTool);
            reg.register(GlobTool);
            reg.register(GrepTool);
            reg.register(WebFetchTool);
            reg.register(TodoWriteTool::new(todos, tool_event_tx.clone()));
            reg.register(SwitchModeTool::new(mode_lock, tool_event_tx));
            reg.register(WriteTool);
            reg.register(EditFileTool);
            reg.register(DeleteFileTool);
            reg.register(ShellTool {
                timeout_secs: cfg.tools.timeout_secs,
            });
            // agent/agentic_fetch intentionally omitted to bound sub-agent nesting

            reg
        }
    }
}
