// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::Mutex;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use kestrel_bootstrap::{AgentBuilder, RuntimeContext, ToolSetProfile};
use kestrel_config::{AgentMode, Config};
use kestrel_core::{Agent, AgentFactory, Coordinator, FinishReason};
use kestrel_model::ModelProvider;
use kestrel_permission::{PermissionBroker, ToolPolicy};
use kestrel_tools::events::TodoItem;

use cli::Cli;

/// Non-interactive runs are a single conversation; the session id only
/// needs to be stable for the lifetime of this process.
const SESSION_ID: &str = "cli";

/// Builds fully-wired [`Agent`]s on demand for the [`Coordinator`].
///
/// Every agent shares one [`PermissionBroker`] (put into yolo mode below, so
/// the run never blocks on interactive approval) but gets its own todo list
/// and runtime context, matching how `AgentBuilder` scopes per-agent state.
struct CliAgentFactory {
    config: Arc<Config>,
    broker: Arc<PermissionBroker>,
}

impl AgentFactory for CliAgentFactory {
    fn build(&self, mode: AgentMode, model: Arc<dyn ModelProvider>) -> Agent {
        let profile = ToolSetProfile::Full {
            todos: Arc::new(Mutex::new(Vec::<TodoItem>::new())),
            task_depth: Arc::new(AtomicUsize::new(0)),
        };
        AgentBuilder::new(self.config.clone())
            .with_runtime_context(RuntimeContext::auto_detect())
            .with_permission_broker(self.broker.clone())
            .build(mode, model, profile)
    }

    fn build_subagent(&self, mode: AgentMode, model: Arc<dyn ModelProvider>) -> Agent {
        let profile = ToolSetProfile::SubAgent {
            todos: Arc::new(Mutex::new(Vec::<TodoItem>::new())),
        };
        AgentBuilder::new(self.config.clone())
            .with_runtime_context(RuntimeContext::auto_detect())
            .with_permission_broker(self.broker.clone())
            .build(mode, model, profile)
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Arc::new(load_config(cli.config.as_deref())?);
    let prompt = cli.read_prompt().context("reading prompt")?;
    if prompt.trim().is_empty() {
        anyhow::bail!("no prompt given (pass one as an argument or on stdin)");
    }

    let model =
        kestrel_model::from_config(&config.model).context("constructing model provider")?;

    let broker = Arc::new(PermissionBroker::new(ToolPolicy::from_config(&config.tools)));
    // A non-interactive run has nobody to ask for approval; auto-approve
    // everything the session does rather than hanging on a permission request.
    broker.set_skip_requests(true);

    let factory: Arc<dyn AgentFactory> = Arc::new(CliAgentFactory {
        config: config.clone(),
        broker,
    });
    let coordinator = Coordinator::new(factory, model, cli.mode);

    let run_fut = coordinator.run(SESSION_ID, &prompt);
    tokio::pin!(run_fut);

    let result = tokio::select! {
        result = &mut run_fut => result,
        _ = tokio::signal::ctrl_c() => {
            coordinator.cancel(SESSION_ID).await;
            run_fut.await
        }
    };

    match result {
        Ok(outcome) => {
            println!("{}", outcome.text);
            match outcome.finish_reason {
                FinishReason::EndTurn => Ok(()),
                FinishReason::Cancelled => std::process::exit(130),
                FinishReason::Error => std::process::exit(1),
            }
        }
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}
