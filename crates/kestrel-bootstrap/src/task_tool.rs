// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Subagent tools — `agent` and `agentic_fetch`.
//!
//! Kept in `kestrel-bootstrap` rather than `kestrel-core` so that they can use
//! `build_tool_registry` without creating a circular dependency
//! (kestrel-core → kestrel-tools, kestrel-bootstrap → kestrel-core + kestrel-tools).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use kestrel_config::{AgentConfig, AgentMode, Config};
use kestrel_core::{Agent, AgentEvent, AgentRuntimeContext};
use kestrel_model::{CompletionRequest, Message};

use kestrel_tools::{
    builtin::web_fetch::fetch_url,
    events::{TodoItem, ToolEvent},
    ApprovalPolicy,
    Tool, ToolCall, ToolOutput,
};

use crate::context::ToolSetProfile;
use crate::registry::build_tool_registry;

const MAX_DEPTH: usize = 3;
const AGENTIC_FETCH_MAX_CHARS: usize = 50_000;

/// Spawns a sub-agent to complete a focused task and returns its text output.
pub struct AgentTool {
    model: Arc<dyn kestrel_model::ModelProvider>,
    config: Arc<Config>,
    depth: Arc<AtomicUsize>,
    /// Runtime context to pass to each sub-agent (project root, CI/git notes,
    /// AGENTS.md content).  Sub-agents inherit the parent's context so they
    /// know where to operate.
    sub_agent_runtime: AgentRuntimeContext,
}

impl AgentTool {
    pub fn new(
        model: Arc<dyn kestrel_model::ModelProvider>,
        config: Arc<Config>,
        depth: Arc<AtomicUsize>,
        sub_agent_runtime: AgentRuntimeContext,
    ) -> Self {
        Self {
            model,
            config,
            depth,
            sub_agent_runtime,
        }
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        "agent"
    }

    fn description(&self) -> &str {
        "Spawn a sub-agent to complete a focused task and return its final text output. \
         Useful for delegating isolated sub-tasks that don't need to pollute the main \
         conversation's context. The sub-agent has access to all standard tools except \
         `agent` and `agentic_fetch` themselves. Maximum nesting depth is 3."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "The task description for the sub-agent"
                },
                "mode": {
                    "type": "string",
                    "enum": ["research", "plan", "agent"],
                    "description": "Operating mode for the sub-agent (default: agent)"
                },
                "max_rounds": {
                    "type": "integer",
                    "description": "Maximum tool-call rounds (default: from config)"
                }
            },
            "required": ["prompt"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    fn modes(&self) -> &[AgentMode] {
        &[AgentMode::Agent]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let prompt = match call.args.get("prompt").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'prompt'"),
        };
        let mode_str = call
            .args
            .get("mode")
            .and_then(|v| v.as_str())
            .unwrap_or("agent");
        let mode = match mode_str {
            "research" => AgentMode::Research,
            "plan" => AgentMode::Plan,
            "agent" => AgentMode::Agent,
            other => return ToolOutput::err(&call.id, format!("unknown mode: {other}")),
        };

        let current_depth = self.depth.load(Ordering::Relaxed);
        if current_depth >= MAX_DEPTH {
            return ToolOutput::err(
                &call.id,
                format!("maximum sub-agent depth ({MAX_DEPTH}) reached"),
            );
        }

        self.depth.fetch_add(1, Ordering::Relaxed);
        debug!(prompt = %prompt, mode = %mode_str, depth = current_depth + 1, "agent: spawning sub-agent");

        let mut sub_config: AgentConfig = self.config.agent.clone();
        if let Some(max_rounds) = call.args.get("max_rounds").and_then(|v| v.as_u64()) {
            sub_config.max_tool_rounds = max_rounds as u32;
        }

        let todos: Arc<Mutex<Vec<TodoItem>>> = Arc::new(Mutex::new(Vec::new()));

        let profile = ToolSetProfile::SubAgent { todos };

        // Shared mode lock and tool-event channel wired through to the agent
        // so SwitchModeTool and TodoWriteTool events are correctly observed.
        let mode_lock = Arc::new(Mutex::new(mode));
        let (tool_event_tx, tool_event_rx) = mpsc::channel::<ToolEvent>(64);

        // Sub-agents use the SubAgent profile (no agent/agentic_fetch), so
        // sub_agent_runtime is unused by build_tool_registry — pass default.
        let tools = Arc::new(build_tool_registry(
            &self.config,
            self.model.clone(),
            profile,
            mode_lock.clone(),
            tool_event_tx,
            AgentRuntimeContext::default(),
        ));

        let context_window = self.model.catalog_context_window().unwrap_or(128_000) as usize;

        let mut agent = Agent::new(
            self.model.clone(),
            tools,
            Arc::new(sub_config),
            self.sub_agent_runtime.clone(),
            mode_lock,
            tool_event_rx,
            context_window,
        );

        let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);

        let submit_result = agent.submit(&prompt, tx).await;

        let mut output = String::new();
        while let Ok(event) = rx.try_recv() {
            if let AgentEvent::TextComplete(text) = event {
                output = text;
            }
        }

        self.depth.fetch_sub(1, Ordering::Relaxed);

        match submit_result {
            Ok(_) => {
                if output.is_empty() {
                    ToolOutput::ok(&call.id, "(sub-agent produced no text output)")
                } else {
                    ToolOutput::ok(&call.id, output)
                }
            }
            Err(e) => ToolOutput::err(&call.id, format!("sub-agent error: {e}")),
        }
    }
}

/// Fetches a URL, then asks the model to answer a question or extract
/// specific information from the fetched content in a single tool-free
/// completion. Distinguished from the plain `web_fetch` tool (which returns
/// raw page text verbatim): `agentic_fetch` is for when the caller wants a
/// distilled answer rather than the whole page dumped into its own context.
pub struct AgenticFetchTool {
    model: Arc<dyn kestrel_model::ModelProvider>,
}

impl AgenticFetchTool {
    pub fn new(model: Arc<dyn kestrel_model::ModelProvider>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Tool for AgenticFetchTool {
    fn name(&self) -> &str {
        "agentic_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL and use a model call to answer a question or extract specific \
         information from its content, instead of returning the full page text. \
         Prefer this over `web_fetch` when only a small piece of a large page is needed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch (http or https)"
                },
                "prompt": {
                    "type": "string",
                    "description": "What to extract or answer from the fetched content"
                }
            },
            "required": ["url", "prompt"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let url = match call.args.get("url").and_then(|v| v.as_str()) {
            Some(u) => u.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'url'"),
        };
        let prompt = match call.args.get("prompt").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'prompt'"),
        };

        debug!(url = %url, "agentic_fetch: fetching");
        let content = match fetch_url(&url, AGENTIC_FETCH_MAX_CHARS).await {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, format!("fetch error: {e}")),
        };

        let extraction_prompt = format!(
            "You were asked to answer the following about the content of {url}:\n\n\
             {prompt}\n\n\
             Page content:\n\n{content}\n\n\
             Answer concisely, using only information present in the page content above. \
             If the answer isn't there, say so."
        );

        let request = CompletionRequest {
            messages: vec![Message::user(extraction_prompt)],
            tools: Vec::new(),
            stream: false,
            system_dynamic_suffix: None,
        };

        match self.model.generate(request).await {
            Ok(response) => ToolOutput::ok(&call.id, response.text),
            Err(e) => ToolOutput::err(&call.id, format!("agentic_fetch model error: {e}")),
        }
    }
}
