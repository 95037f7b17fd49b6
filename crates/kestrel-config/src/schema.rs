// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// Used for config fields that should be enabled unless the user explicitly
/// sets them to `false`.  `#[serde(default)]` on a `bool` always falls back
/// to `bool::default()` (i.e. `false`), so a named function is required.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Named provider configurations.
    ///
    /// Define custom endpoints, local models, or additional accounts here and
    /// reference them by name with `--model <key>` or `--model <key>/<model>`.
    #[serde(default)]
    pub providers: std::collections::HashMap<String, ModelConfig>,
}

/// Configuration for a single model provider.
///
/// Deliberately shallow: concrete wire-format details (request shaping,
/// header construction, per-provider auth schemes) live in the provider
/// drivers, which this core does not implement — it consumes a uniform
/// streaming interface ([`kestrel_model::ModelProvider`]).  This struct only
/// carries what any driver needs to be selected and authenticated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier, e.g. "openai", "anthropic", "mock".
    pub provider: String,
    /// Model name forwarded to the provider API.
    pub name: String,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files.
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local proxies or self-hosted servers.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion.
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0).
    pub temperature: Option<f32>,
    /// Free-form provider-specific options forwarded as-is to the driver.
    #[serde(default)]
    pub driver_options: serde_json::Value,
    /// Path to a YAML scripted-responses file (used when provider = "mock").
    pub mock_responses_file: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "mock".into(),
            name: "mock-model".into(),
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: Some(4096),
            temperature: Some(0.2),
            driver_options: serde_json::Value::Null,
            mock_responses_file: None,
        }
    }
}

fn default_agent_mode() -> AgentMode {
    AgentMode::Agent
}
fn default_max_tool_rounds() -> u32 {
    200
}
fn default_compaction_threshold() -> f32 {
    0.85
}
fn default_compaction_keep_recent() -> usize {
    6
}
fn default_tool_result_token_cap() -> usize {
    4000
}
fn default_compaction_overhead_reserve() -> f32 {
    0.10
}
fn default_max_subagent_depth() -> usize {
    3
}

/// Strategy used when compacting the session context.
///
/// `Structured` (default) instructs the model to produce a typed Markdown
/// checkpoint with fixed sections (Active Task, Key Decisions, Files &
/// Artifacts, Constraints, Pending Items, Session Narrative).  This produces
/// checkpoints that are easier for the model to navigate on future turns.
///
/// `Narrative` uses the original free-form summarisation prompt and is
/// available when a simpler output is preferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompactionStrategy {
    #[default]
    Structured,
    Narrative,
}

impl std::fmt::Display for CompactionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactionStrategy::Structured => write!(f, "structured"),
            CompactionStrategy::Narrative => write!(f, "narrative"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Default mode when none is specified by the caller.
    #[serde(default = "default_agent_mode")]
    pub default_mode: AgentMode,
    /// Maximum number of autonomous tool-call rounds before stopping.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Token fraction at which proactive compaction triggers (0.0–1.0).
    /// The budget gate compares the calibrated token estimate against the
    /// model's effective input budget (context window minus max output
    /// tokens minus `compaction_overhead_reserve`).
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f32,
    /// Number of recent non-system messages preserved verbatim during
    /// compaction.  Messages older than this tail are summarised.  A value of
    /// 0 summarises the full history.
    #[serde(default = "default_compaction_keep_recent")]
    pub compaction_keep_recent: usize,
    /// Compaction checkpoint format.
    #[serde(default)]
    pub compaction_strategy: CompactionStrategy,
    /// Maximum tokens allowed for a single tool result before it is
    /// deterministically truncated before entering the session.  0 disables
    /// per-result truncation.
    #[serde(default = "default_tool_result_token_cap")]
    pub tool_result_token_cap: usize,
    /// Fraction of the context window reserved for tool schemas, the dynamic
    /// context block, and estimation error.
    #[serde(default = "default_compaction_overhead_reserve")]
    pub compaction_overhead_reserve: f32,
    /// System prompt override; leave `None` to use the built-in prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Maximum nesting depth for subagents spawned via the `agent` tool.
    #[serde(default = "default_max_subagent_depth")]
    pub max_subagent_depth: usize,
    /// Per-step wall-clock timeout in seconds (0 = no limit).
    #[serde(default)]
    pub max_step_timeout_secs: u64,
    /// Total run wall-clock timeout in seconds (0 = no limit).
    #[serde(default)]
    pub max_run_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_mode: AgentMode::Agent,
            max_tool_rounds: default_max_tool_rounds(),
            compaction_threshold: default_compaction_threshold(),
            compaction_keep_recent: default_compaction_keep_recent(),
            compaction_strategy: CompactionStrategy::Structured,
            tool_result_token_cap: default_tool_result_token_cap(),
            compaction_overhead_reserve: default_compaction_overhead_reserve(),
            system_prompt: None,
            max_subagent_depth: default_max_subagent_depth(),
            max_step_timeout_secs: 0,
            max_run_timeout_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Pure research – read-only tools, no writes.
    Research,
    /// Generate a structured plan, no code changes.
    Plan,
    /// Full agent with read/write tools.
    Agent,
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentMode::Research => write!(f, "research"),
            AgentMode::Plan => write!(f, "plan"),
            AgentMode::Agent => write!(f, "agent"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Automatically approve shell commands matching these glob patterns.
    pub auto_approve_patterns: Vec<String>,
    /// Block shell commands matching these glob patterns, overriding
    /// `auto_approve_patterns` when both match.
    pub deny_patterns: Vec<String>,
    /// Timeout in seconds for a single tool call.
    pub timeout_secs: u64,
    /// Web fetch configuration.
    #[serde(default)]
    pub web: WebConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            auto_approve_patterns: vec![
                "cat *".into(),
                "ls *".into(),
                "find *".into(),
                "rg *".into(),
                "grep *".into(),
            ],
            deny_patterns: vec!["rm -rf /*".into(), "dd if=*".into()],
            timeout_secs: 30,
            web: WebConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Default maximum characters returned by `web_fetch`.
    pub fetch_max_chars: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            fetch_max_chars: 50_000,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_uses_mock_provider() {
        let c = Config::default();
        assert_eq!(c.model.provider, "mock");
    }

    #[test]
    fn agent_config_default_compaction_threshold() {
        let a = AgentConfig::default();
        assert!((a.compaction_threshold - 0.85).abs() < f32::EPSILON);
        assert_eq!(a.max_subagent_depth, 3);
    }

    #[test]
    fn tools_config_default_patterns() {
        let t = ToolsConfig::default();
        assert!(t.auto_approve_patterns.contains(&"ls *".to_string()));
        assert!(t.deny_patterns.contains(&"rm -rf /*".to_string()));
    }

    #[test]
    fn compaction_strategy_defaults_to_structured() {
        assert_eq!(CompactionStrategy::default(), CompactionStrategy::Structured);
        assert_eq!(CompactionStrategy::Structured.to_string(), "structured");
    }

    #[test]
    fn config_serialises_to_valid_yaml() {
        let c = Config::default();
        let yaml_str = serde_yaml::to_string(&c).unwrap();
        assert!(yaml_str.contains("provider"));
    }

    #[test]
    fn config_deserialises_from_yaml() {
        let yaml_str =
            "model:\n  provider: anthropic\n  name: claude-opus-4-5\n  max_tokens: 8192\n";
        let c: Config = serde_yaml::from_str(yaml_str).unwrap();
        assert_eq!(c.model.provider, "anthropic");
        assert_eq!(c.model.name, "claude-opus-4-5");
        assert_eq!(c.model.max_tokens, Some(8192));
    }

    #[test]
    fn config_partial_yaml_fills_in_defaults() {
        let yaml_str = "model:\n  name: gpt-4o-mini\n  provider: openai\n";
        let c: Config = serde_yaml::from_str(yaml_str).unwrap();
        assert_eq!(c.model.name, "gpt-4o-mini");
        assert_eq!(
            c.agent.max_tool_rounds,
            AgentConfig::default().max_tool_rounds
        );
    }

    #[test]
    fn agent_mode_yaml_serde_roundtrip() {
        #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
        struct Wrap {
            mode: AgentMode,
        }
        let w = Wrap {
            mode: AgentMode::Plan,
        };
        let s = serde_yaml::to_string(&w).unwrap();
        let back: Wrap = serde_yaml::from_str(&s).unwrap();
        assert_eq!(back.mode, AgentMode::Plan);
    }

    #[test]
    fn config_default_providers_is_empty() {
        let c = Config::default();
        assert!(c.providers.is_empty(), "providers must be empty by default");
    }

    #[test]
    fn config_providers_deserialised_from_yaml() {
        let yaml = r#"
providers:
  my_ollama:
    provider: openai
    base_url: http://localhost:11434/v1
    name: llama3.2
"#;
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(c.providers.len(), 1);
        let p = c.providers.get("my_ollama").unwrap();
        assert_eq!(p.provider, "openai");
        assert_eq!(p.base_url.as_deref(), Some("http://localhost:11434/v1"));
        assert_eq!(p.name, "llama3.2");
    }

    #[test]
    fn config_providers_round_trip_yaml() {
        let yaml = r#"
providers:
  local:
    provider: openai
    base_url: http://127.0.0.1:8080/v1
    name: phi-3
"#;
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        let serialised = serde_yaml::to_string(&c).unwrap();
        let back: Config = serde_yaml::from_str(&serialised).unwrap();
        let p = back.providers.get("local").unwrap();
        assert_eq!(p.name, "phi-3");
        assert_eq!(p.base_url.as_deref(), Some("http://127.0.0.1:8080/v1"));
    }
}
