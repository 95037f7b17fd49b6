// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::io::Read;
use std::path::PathBuf;

use clap::Parser;
use kestrel_config::AgentMode;

fn parse_mode(s: &str) -> Result<AgentMode, String> {
    match s.to_ascii_lowercase().as_str() {
        "research" => Ok(AgentMode::Research),
        "plan" => Ok(AgentMode::Plan),
        "agent" => Ok(AgentMode::Agent),
        other => Err(format!("unknown mode '{other}' (expected research|plan|agent)")),
    }
}

/// Non-interactive driver for the kestrel agent core: run one prompt to
/// completion and print the final assistant text to stdout.
#[derive(Parser, Debug)]
#[command(
    name = "kestrel",
    about = "Non-interactive driver for the kestrel agent core",
    version,
    long_about = None,
)]
pub struct Cli {
    /// The prompt to run. Read from stdin if omitted.
    #[arg(value_name = "PROMPT")]
    pub prompt: Option<String>,

    /// Path to a YAML config file (overrides the built-in defaults).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Agent mode.
    #[arg(long, short = 'm', value_parser = parse_mode, default_value = "agent")]
    pub mode: AgentMode,

    /// Increase verbosity (-v = debug, -vv = trace).
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Resolve the prompt to run: the positional argument, or all of stdin
    /// if it was omitted.
    pub fn read_prompt(&self) -> std::io::Result<String> {
        if let Some(p) = &self.prompt {
            return Ok(p.clone());
        }
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf.trim_end().to_string())
    }
}
