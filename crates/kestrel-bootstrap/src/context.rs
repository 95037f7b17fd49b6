// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Runtime context types for agent construction.
//!
//! [`RuntimeContext`] holds environment-detected information (project root,
//! git state, CI environment) that is not part of the config file schema.
//!
//! [`ToolSetProfile`] selects which tools to register, and carries the
//! shared state needed by stateful tools (todos, mode lock, GDB state).

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use tokio::sync::Mutex;

use kestrel_tools::events::TodoItem;
use kestrel_runtime::{CiContext, GitContext, SharedAgents, SharedKnowledge, SharedSkills};

// ─── RuntimeContext ───────────────────────────────────────────────────────────

/// Environment-detected context for an agent session.
///
/// This is separate from [`kestrel_config::AgentConfig`] (which holds only
/// config-file fields) so that the two concerns — "what the user configured"
/// and "what we found at runtime" — stay cleanly separated.
#[derive(Default)]
pub struct RuntimeContext {
    /// Absolute path to the project root (detected from `.git` walk-up).
    pub project_root: Option<PathBuf>,
    /// Live git metadata (branch, commit, dirty state).
    pub git_context: Option<GitContext>,
    /// CI environment metadata.
    pub ci_context: Option<CiContext>,
    /// Contents of `.kestrel/context.md`, `AGENTS.md`, or `CLAUDE.md`.
    pub project_context_file: Option<String>,
    /// Text appended after the default system prompt Guidelines section.
    pub append_system_prompt: Option<String>,
    /// Full system prompt override (from `--system-prompt-file`).
    pub system_prompt_override: Option<String>,
    /// Skills discovered from the standard search hierarchy.
    pub skills: SharedSkills,
    /// Subagents discovered from the standard search hierarchy.
    pub agents: SharedAgents,
    /// Knowledge documents discovered from `.kestrel/knowledge/`.
    pub knowledge: SharedKnowledge,
    /// Pre-formatted knowledge-drift warning block, computed once at startup.
    pub knowledge_drift_note: Option<String>,
}

impl RuntimeContext {
    /// Create with auto-detected project, git, CI, skills, and subagents.
    pub fn auto_detect() -> Self {
        let project_root = kestrel_runtime::find_project_root().ok();
        let git_context = project_root.as_ref()
            .map(|r| kestrel_runtime::collect_git_context(r));
        let ci_context = Some(kestrel_runtime::detect_ci_context());
        let project_context_file = project_root.as_ref()
            .and_then(|r| kestrel_runtime::load_project_context_file(r));
        let skills = SharedSkills::new(kestrel_runtime::discover_skills(project_root.as_deref()));
        let agents = SharedAgents::new(kestrel_runtime::discover_agents(project_root.as_deref()));
        let discovered_knowledge = kestrel_runtime::discover_knowledge(project_root.as_deref());
        let knowledge_drift_note = project_root.as_ref().and_then(|r| {
            let warnings = kestrel_runtime::check_knowledge_drift(r, &discovered_knowledge);
            kestrel_runtime::format_drift_warnings(&warnings)
        });
        let knowledge = SharedKnowledge::new(discovered_knowledge);

        Self {
            project_root,
            git_context,
            ci_context,
            project_context_file,
            append_system_prompt: None,
            system_prompt_override: None,
            skills,
            agents,
            knowledge,
            knowledge_drift_note,
        }
    }

    /// Create an empty context (no project/git/CI/skills/agent detection).
    pub fn empty() -> Self {
        Self::default()
    }
}

// ─── ToolSetProfile ───────────────────────────────────────────────────────────

/// Selects which tool set to register and carries the caller-owned shared
/// state that stateful tools require.
///
/// TUI and headless/CI use the same full tool set; only `--mode` (research /
/// plan / agent) controls which tools are exposed to the model. This agent
/// runs non-interactively, so there is no TUI question channel to plumb
/// through — ambiguity is resolved by the model stating its assumption,
/// per the Plan-mode system prompt instructions.
///
/// `mode_lock` and the tool-event channel are intentionally **not** part of
/// this enum — `AgentBuilder::build()` creates them, wires them into the
/// registry, and passes the same instances to `Agent::new()` so that
/// `SwitchModeTool` and `TodoWriteTool` events are correctly observed by the
/// agent loop.
pub enum ToolSetProfile {
    /// Full tool set (TUI and headless/CI). Same tools; mode gates visibility.
    Full {
        todos: Arc<Mutex<Vec<TodoItem>>>,
        task_depth: Arc<AtomicUsize>,
    },

    /// Sub-agent tool set (Full minus `agent`/`agentic_fetch` to bound nesting).
    SubAgent {
        todos: Arc<Mutex<Vec<TodoItem>>>,
    },
}
