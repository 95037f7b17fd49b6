// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::Local;
use std::path::Path;
use std::sync::Arc;

use kestrel_config::AgentMode;
use kestrel_runtime::{AgentInfo, KnowledgeInfo, SkillInfo};

/// All optional contextual blocks that can be injected into the system prompt.
#[derive(Debug)]
pub struct PromptContext<'a> {
    /// Absolute path to the project root (from `.git` detection).
    pub project_root: Option<&'a Path>,
    /// Pre-formatted git context (branch, commit, dirty status).
    ///
    /// **Caching note**: this field is *volatile* — it changes on every commit
    /// and with every file edit (dirty count).  When prompt caching is enabled
    /// this content is placed in a *separate, uncached* system block so that
    /// the stable prefix remains cacheable across sessions.
    pub git_context: Option<&'a str>,
    /// Contents of the project context file (AGENTS.md / .kestrel/context.md).
    pub project_context_file: Option<&'a str>,
    /// Pre-formatted CI environment block.
    ///
    /// **Caching note**: like `git_context`, this is volatile between CI runs.
    pub ci_context: Option<&'a str>,
    /// Text appended verbatim after the default Guidelines section.
    pub append: Option<&'a str>,
    /// Discovered skills.  Metadata (name + description) is injected into the
    /// stable system prompt so the model always knows what skills are available.
    /// Held as an `Arc` so a fresh snapshot can be taken from [`SharedSkills`]
    /// on each turn without cloning the skill data.
    pub skills: Arc<[SkillInfo]>,
    /// Discovered subagents.  Names and descriptions are injected into the
    /// stable system prompt so the model can suggest delegation and the user
    /// can invoke them via slash commands.
    pub agents: Arc<[AgentInfo]>,
    /// Discovered knowledge documents.  A summary section is injected into the
    /// stable system prompt so the model knows the knowledge base exists and
    /// which subsystems it covers.
    pub knowledge: Arc<[KnowledgeInfo]>,
    /// Pre-formatted knowledge drift warning (computed once at session start).
    /// Injected verbatim into the stable system-prompt block.  `None` when all
    /// knowledge documents are current or no `updated:` fields are set.
    pub knowledge_drift_note: Option<&'a str>,
}

impl<'a> Default for PromptContext<'a> {
    fn default() -> Self {
        Self {
            project_root: None,
            git_context: None,
            project_context_file: None,
            ci_context: None,
            append: None,
            skills: Arc::from(Vec::<SkillInfo>::new()),
            agents: Arc::from(Vec::<AgentInfo>::new()),
            knowledge: Arc::from(Vec::<KnowledgeInfo>::new()),
            knowledge_drift_note: None,
        }
    }
}

impl<'a> PromptContext<'a> {
    /// Return a version of this context with the volatile fields cleared.
    ///
    /// Used to build the *stable* (cacheable) portion of the system prompt.
    /// Skills, agents, knowledge docs, and drift notes are stable within a
    /// session (discovered once at startup) so they are included in the stable
    /// slice.
    pub fn stable_only(&self) -> Self {
        Self {
            project_root: self.project_root,
            git_context: None,
            project_context_file: self.project_context_file,
            ci_context: None,
            append: self.append,
            skills: self.skills.clone(),
            agents: self.agents.clone(),
            knowledge: self.knowledge.clone(),
            knowledge_drift_note: self.knowledge_drift_note,
        }
    }

    /// Format the volatile fields (git + CI context) as a block suitable for
    /// appending to the system prompt outside the cached region.
    ///
    /// Returns `None` when neither git nor CI context is present.
    pub fn dynamic_block(&self) -> Option<String> {
        let git = self
            .git_context
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.to_string());
        let ci = self
            .ci_context
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.to_string());
        match (git, ci) {
            (None, None) => None,
            (Some(g), None) => Some(g),
            (None, Some(c)) => Some(c),
            (Some(g), Some(c)) => Some(format!("{g}\n\n{c}")),
        }
    }
}

// ─── Guidelines Module ───────────────────────────────────────────────────────
// Modular guidelines for easier maintenance and testing

mod guidelines {
    pub fn general() -> &'static str {
        "- Be concise and precise. Use tools instead of guessing."
    }

    pub fn tool_usage() -> &'static str {
        "- NEVER use `shell` for file I/O — use `read_file`/`write`/`edit_file`/`grep`/`glob`.\n\
         - Prefer `edit_file` over `write` for modifying existing files (preserves surrounding context).\n\
         - Discovery workflow: `glob` to find files → `grep` to narrow → `read_file` with specific ranges for context.\n\
         - Use `grep` output_mode='content' + context_lines for code-level inspection.\n\
         - Use shell one liners like sed and awk for replacements at scale. \n\
         - Batch `read_file` calls in parallel — read all potentially relevant files in one turn."
    }

    pub fn code_quality() -> &'static str {
        "- Make sure all the code you generate is production quality and follows good separation of concerns and clean code principles.\n\
         - NEVER create new files proactively unless explicitly requested. Do not create 'summary' md files unless requested.\n\
         - Write tests when adding new functionality. \n\
         - Preserve existing code structure and coding style patterns."
    }

    pub fn workflow_efficiency() -> &'static str {
        "- Use `todo_write` for multi-step tasks (3+ steps); update silently and mark complete after completing each step.\n\
         - Use `switch_mode` to transition between Research, Plan, and Agent modes proactively.\n\
         - Batch independent tool calls in parallel to increase efficiency.\n\
         - Delegate isolated, self-contained sub-tasks to the `agent` tool rather than doing everything inline."
    }

    pub fn error_handling() -> &'static str {
        "- When a tool fails, try a different approach.\n\
         - Always set `workdir` in `shell` to project_root for commands that depend on location.\n\
         - NEVER skip git hooks or force-push without explicit user permission."
    }
}

// ─── Skills section ───────────────────────────────────────────────────────────

/// Maximum total characters for the `<available_skills>` block in the system
/// prompt.  Binary search is used to fit within this budget when there are many
/// skills.
pub const MAX_SKILLS_PROMPT_CHARS: usize = 30_000;

/// Format the available-skills block for injection into the system prompt.
///
/// Skills with `user_invocable_only: true` are omitted (they are still
/// registered as TUI slash commands but not shown to the model).
/// Skills with `always: true` bypass the char-budget check and are always
/// included.
///
/// Returns an empty string when `skills` is empty.
pub fn build_skills_section(skills: &[SkillInfo]) -> String {
    if skills.is_empty() {
        return String::new();
    }

    let always_skills: Vec<&SkillInfo> = skills
        .iter()
        .filter(|s| s.kestrel_meta.as_ref().is_some_and(|m| m.always))
        .collect();

    let candidate_skills: Vec<&SkillInfo> = skills
        .iter()
        .filter(|s| {
            let is_always = s.kestrel_meta.as_ref().is_some_and(|m| m.always);
            let user_only = s.kestrel_meta.as_ref().is_some_and(|m| m.user_invocable_only);
            !user_only && !is_always
        })
        .collect();

    // Build XML entries for always-included skills.
    let always_entries: Vec<String> = always_skills
        .iter()
        .map(|s| format!(
            "  <skill>\n    <command>{}</command>\n    <name>{}</name>\n    <description>{}</description>\n    <path>{}</path>\n  </skill>",
            s.command,
            s.name,
            s.description.trim(),
            s.skill_md_path.display()
        ))
        .collect();

    let remaining_budget = MAX_SKILLS_PROMPT_CHARS
        .saturating_sub(always_entries.iter().map(|e| e.len()).sum::<usize>());

    let candidate_entries: Vec<String> = candidate_skills
        .iter()
        .map(|s| format!(
            "  <skill>\n    <command>{}</command>\n    <name>{}</name>\n    <description>{}</description>\n    <path>{}</path>\n  </skill>",
            s.command,
            s.name,
            s.description.trim(),
            s.skill_md_path.display()
        ))
        .collect();

    // Walk forward through candidate entries, accumulating size, and stop once the
    // budget would be exceeded.  Skills are bounded in practice (< a few hundred),
    // so a linear scan is both correct and efficient.
    let mut used = 0usize;
    let fitted_count = candidate_entries
        .iter()
        .take_while(|e| {
            let next = used + e.len();
            if next <= remaining_budget {
                used = next;
                true
            } else {
                false
            }
        })
        .count();
    let fitted_entries = &candidate_entries[..fitted_count];

    let all_entries: Vec<&str> = always_entries
        .iter()
        .chain(fitted_entries.iter())
        .map(String::as_str)
        .collect();

    if all_entries.is_empty() {
        return String::new();
    }

    let truncated = fitted_count < candidate_entries.len();
    let truncation_note = if truncated {
        format!(
            "\n⚠ Skills truncated: showing {} of {}.",
            fitted_count + always_entries.len(),
            skills.len()
        )
    } else {
        String::new()
    };

    format!(
        "## Skills\n\n\
         When you recognize that the current task matches one of the available skills listed \
         below, use `read_file` on its `<path>` to load the full skill instructions before \
         proceeding. Use the skill `<description>` to decide which skill is absolutely needed for the task.
         Read at most one skill per task; do not read a skill unless it clearly applies.\
         {truncation_note}\n\n\
         <available_skills>\n{}\n</available_skills>",
        all_entries.join("\n")
    )
}

// ─── Agents section ───────────────────────────────────────────────────────────

/// Maximum total characters for the `<available_agents>` block.
pub const MAX_AGENTS_PROMPT_CHARS: usize = 10_000;

/// Format the available-agents block for injection into the system prompt.
///
/// Returns an empty string when `agents` is empty.
pub fn build_agents_section(agents: &[AgentInfo]) -> String {
    if agents.is_empty() {
        return String::new();
    }

    let entries: Vec<String> = agents
        .iter()
        .map(|a| {
            let model_hint = match a.model.as_deref() {
                Some(m) => format!("\n    <model>{m}</model>"),
                None => String::new(),
            };
            let bg_hint = if a.is_background { "\n    <background>true</background>" } else { "" };
            let ro_hint = if a.readonly { "\n    <readonly>true</readonly>" } else { "" };
            format!(
                "  <agent>\n    <name>{}</name>\n    <description>{}</description>{}{}{}\n  </agent>",
                a.name,
                a.description.trim(),
                model_hint,
                bg_hint,
                ro_hint,
            )
        })
        .collect();

    // Fit entries within budget.
    let mut used = 0usize;
    let fitted_count = entries
        .iter()
        .take_while(|e| {
            let next = used + e.len();
            if next <= MAX_AGENTS_PROMPT_CHARS {
                used = next;
                true
            } else {
                false
            }
        })
        .count();

    if fitted_count == 0 {
        return String::new();
    }

    let fitted = &entries[..fitted_count];
    let truncation_note = if fitted_count < entries.len() {
        format!(
            "\n⚠ Agents truncated: showing {} of {}.",
            fitted_count,
            agents.len()
        )
    } else {
        String::new()
    };

    format!(
        "## Subagents\n\n\
         The following subagents are available for delegation.  When the user's task \
         clearly matches a subagent's description, suggest invoking it explicitly with \
         a slash command (e.g. `/verifier confirm the auth flow`).  Users can also \
         invoke subagents directly by typing `/<name> <task>` in the input box.\
         {truncation_note}\n\n\
         <available_agents>\n{}\n</available_agents>",
        fitted.join("\n")
    )
}

/// Guidelines injected into the system prompt when an agent is executing a
/// task that was **delegated to it by a peer** over the P2P swarm.
///
/// The goal is to prevent reflexive re-delegation: receiving a task and
/// immediately routing it back out without attempting any local work.
pub fn p2p_task_guidelines() -> &'static str {
    "## P2P Task Execution Guidelines\n\n\
     You have received this task from a peer agent in the swarm.  **Your job is \
     to execute it — not to route it.**\n\n\
     Rules you MUST follow:\n\
     - **Attempt the task locally first.**  Use your own tools (files, shell, \
       web search, etc.) before considering delegation.\n\
     - **Only use `delegate_task` as an absolute last resort** — specifically \
       when the task requires a capability or resource that is provably only \
       available on a different peer AND you have already attempted local \
       execution and confirmed it is impossible.\n\
     - **Never delegate back to the peer that sent you this task.**  Doing so \
       creates a deadlock and the request will be rejected.\n\
     - **Never use `delegate_task` as your first tool call.**  Always try at \
       least one local approach first.\n\
     - If you genuinely cannot complete the task with any local approach, \
       respond with a clear failure message explaining what is missing."
}

// ─── Knowledge section ────────────────────────────────────────────────────────

/// Maximum total characters for the `<knowledge_base>` block.
pub const MAX_KNOWLEDGE_PROMPT_CHARS: usize = 8_000;

/// Format the knowledge-base overview block for injection into the system
/// prompt.  Shows subsystem names and their covered file patterns so the model
/// knows which domains have specifications without loading all doc bodies.
///
/// Returns an empty string when `knowledge` is empty.
pub fn build_knowledge_section(knowledge: &[KnowledgeInfo]) -> String {
    if knowledge.is_empty() {
        return String::new();
    }

    let entries: Vec<String> = knowledge
        .iter()
        .map(|k| {
            let files_hint = if k.files.is_empty() {
                String::new()
            } else {
                format!(" ({})", k.files.join(", "))
            };
            let updated_hint = k
                .updated
                .as_deref()
                .map(|d| format!(" — updated {d}"))
                .unwrap_or_default();
            format!(
                "  <doc>\n    <subsystem>{}</subsystem>{}{}\n    <path>{}</path>\n  </doc>",
                k.subsystem, files_hint, updated_hint, k.path.display()
            )
        })
        .collect();

    // Fit within budget.
    let mut used = 0usize;
    let fitted_count = entries
        .iter()
        .take_while(|e| {
            let next = used + e.len();
            if next <= MAX_KNOWLEDGE_PROMPT_CHARS {
                used = next;
                true
            } else {
                false
            }
        })
        .count();

    if fitted_count == 0 {
        return String::new();
    }

    let fitted = &entries[..fitted_count];
    let truncation_note = if fitted_count < entries.len() {
        format!(
            "\n⚠ Knowledge base truncated: showing {} of {}.",
            fitted_count,
            knowledge.len()
        )
    } else {
        String::new()
    };

    format!(
        "## Knowledge Base\n\n\
         Project knowledge documents are available for these subsystems.  Use \
         `grep` against `.kestrel/knowledge/` to find relevant specs before modifying a \
         subsystem, or `read_file` on a doc's `<path>` to read it in full.\
         {truncation_note}\n\n\
         <knowledge_base>\n{}\n</knowledge_base>",
        fitted.join("\n")
    )
}

fn build_guidelines_section() -> String {
    format!(
        "## Guidelines\n\n\
         ### General Principles\n\
         {}\n\n\
         ### Tool Usage Patterns\n\
         {}\n\n\
         ### Code Quality\n\
         {}\n\n\
         ### Workflow Efficiency\n\
         {}\n\n\
         ### Error Handling\n\
         {}",
        guidelines::general(),
        guidelines::tool_usage(),
        guidelines::code_quality(),
        guidelines::workflow_efficiency(),
        guidelines::error_handling(),
    )
}

/// Build the system prompt for the given agent mode.
///
/// `ctx` carries optional project / CI / git context injected when running
/// in headless mode.
pub fn system_prompt(mode: AgentMode, custom: Option<&str>, ctx: PromptContext<'_>) -> String {
    if let Some(custom) = custom {
        // Even with a custom prompt, honour append if set.
        if let Some(extra) = ctx.append {
            return format!("{}\n\n{}", custom.trim_end(), extra);
        }
        return custom.to_string();
    }

    // Enhanced agent identity highlighting Kestrel's unique features
    let agent_identity = format!(
        "You are Kestrel, a specialized AI coding agent built for professional software engineering.\n\n\
         Operating Mode: `{mode}`\n\n\
         Current date and time: `{current_date_time}`\n\n\
         Current working directory: `{current_working_directory}`\n\
         Core Capabilities:\n\
         - Multi-mode operation (Research, Plan, Agent) with dynamic mode switching\n\
         - Delegation to focused sub-agents for isolated sub-tasks\n\
         - Markdown-driven workflows with frontmatter configuration\n\
         - Comprehensive linting and test integration\n\
         - Full CI/CD pipeline integration and awareness",
        current_date_time = Local::now().format("%Y-%m-%d %H:%M:%S"),
        current_working_directory = std::env::current_dir().unwrap().display());

    let mode_instructions = match mode {
        AgentMode::Research => {
            "You are a research assistant.  You may read files, search the codebase, and look up \
             information.  You MUST NOT write, modify, or delete any files. Research mode \
             is non-destructive. Focus on gathering all the information needed in order to \
             satisfy user's request."
        }
        AgentMode::Plan => {
            "You are a planning assistant.  Analyse the request and produce a clear, structured \
             plan with numbered steps.  You may read files to inform the plan, but MUST NOT \
             modify them.  Output the plan in Markdown. \
             When a task is ambiguous, state your assumption explicitly in the plan rather than \
             blocking on a question — this agent runs non-interactively and cannot prompt the \
             user mid-turn."
        }
        AgentMode::Agent => {
            "You are a capable coding agent.  You can read and write files, run shell commands, \
             and search the codebase.  Work systematically, verify your changes, and report \
             your progress clearly.\n\
             Keep in mind the following:
             - Maximize parallel tool calls.\n\
             - Always complete all todos before completing your turn.\n\
             - Always complete the task requested by the user before completion your turn."
        }
    };

    let project_section = if let Some(root) = ctx.project_root {
        format!(
            "\n\n## Project Context\n\
             Project root directory: `{}`\n\
             - Use this absolute path for all file read/write operations.\n\
             - Pass this path as the `workdir` argument to `shell` \
               so commands execute in the correct directory.\n\
             - Prefer absolute paths over relative paths in every tool call.",
            root.display()
        )
    } else {
        String::new()
    };

    let git_section = if let Some(git) = ctx.git_context {
        format!("\n\n{git}")
    } else {
        String::new()
    };

    // Project context file (AGENTS.md / .kestrel/context.md) — injected as a
    // labelled section so the model treats it as authoritative instructions.
    let context_file_section = if let Some(content) = ctx.project_context_file {
        format!("\n\n## Project Instructions\n\n{content}")
    } else {
        String::new()
    };

    let ci_section = if let Some(ci) = ctx.ci_context {
        format!("\n\n{ci}")
    } else {
        String::new()
    };

    // Skills — stable, injected after project instructions and before CI/git.
    let skills_section = {
        let s = build_skills_section(&ctx.skills);
        if s.is_empty() {
            String::new()
        } else {
            format!("\n\n{s}")
        }
    };

    // Agents — stable, injected after skills.
    let agents_section = {
        let s = build_agents_section(&ctx.agents);
        if s.is_empty() {
            String::new()
        } else {
            format!("\n\n{s}")
        }
    };

    // Knowledge base overview — stable, injected after agents.
    let knowledge_section = {
        let s = build_knowledge_section(&ctx.knowledge);
        if s.is_empty() {
            String::new()
        } else {
            format!("\n\n{s}")
        }
    };

    // Knowledge drift warning — stable (computed once at session start).
    let knowledge_drift_section = if let Some(note) = ctx.knowledge_drift_note {
        format!("\n\n{note}")
    } else {
        String::new()
    };

    let guidelines_section = build_guidelines_section();

    let append_section = if let Some(extra) = ctx.append {
        format!("\n\n{extra}")
    } else {
        String::new()
    };

    format!(
        "{agent_identity}\n\n\
         {mode_instructions}{project_section}{git_section}\
         {context_file_section}{skills_section}{agents_section}\
         {knowledge_section}{knowledge_drift_section}{ci_section}\n\n\
         {guidelines_section}\
         {append_section}",
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
