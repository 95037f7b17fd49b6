// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end tests driving the coordinator, tool runtime, and permission
//! broker together through the same `kestrel-bootstrap` wiring the `kestrel`
//! binary uses, rather than through `kestrel-core`'s internal test doubles.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use kestrel_bootstrap::{AgentBuilder, RuntimeContext, ToolSetProfile};
use kestrel_config::{AgentMode, Config};
use kestrel_core::{Agent, AgentFactory, Coordinator, FinishReason};
use kestrel_model::{
    CompletionRequest, ModelProvider, ResponseEvent, ResponseStream, ScriptedMockProvider,
};
use kestrel_permission::{PermissionBroker, PermissionRequest, ToolPolicy};
use kestrel_tools::events::TodoItem;
use tokio::sync::Mutex;

struct TestFactory {
    config: Arc<Config>,
    broker: Arc<PermissionBroker>,
}

impl AgentFactory for TestFactory {
    fn build(&self, mode: AgentMode, model: Arc<dyn ModelProvider>) -> Agent {
        AgentBuilder::new(self.config.clone())
            .with_runtime_context(RuntimeContext::empty())
            .with_permission_broker(self.broker.clone())
            .build(
                mode,
                model,
                ToolSetProfile::Full {
                    todos: Arc::new(Mutex::new(Vec::<TodoItem>::new())),
                    task_depth: Arc::new(AtomicUsize::new(0)),
                },
            )
    }

    fn build_subagent(&self, mode: AgentMode, model: Arc<dyn ModelProvider>) -> Agent {
        AgentBuilder::new(self.config.clone())
            .with_runtime_context(RuntimeContext::empty())
            .with_permission_broker(self.broker.clone())
            .build(
                mode,
                model,
                ToolSetProfile::SubAgent {
                    todos: Arc::new(Mutex::new(Vec::<TodoItem>::new())),
                },
            )
    }
}

fn new_broker() -> Arc<PermissionBroker> {
    Arc::new(PermissionBroker::new(ToolPolicy::from_config(
        &Config::default().tools,
    )))
}

fn coordinator_with(model: ScriptedMockProvider, broker: Arc<PermissionBroker>) -> Coordinator {
    let factory: Arc<dyn AgentFactory> = Arc::new(TestFactory {
        config: Arc::new(Config::default()),
        broker,
    });
    Coordinator::new(factory, Arc::new(model), AgentMode::Agent)
}

/// Spawns a task that resolves the next permission request it sees on
/// `broker`'s bus, approving or denying it as directed.
fn spawn_approver(broker: Arc<PermissionBroker>, approve: bool) {
    let mut requests = broker.requests.subscribe();
    tokio::spawn(async move {
        if let Some(event) = requests.recv().await {
            let req: PermissionRequest = event.payload;
            if approve {
                broker.grant(&req.id);
            } else {
                broker.deny(&req.id);
            }
        }
    });
}

// ── Scenario A — one-shot text response ─────────────────────────────────────

#[tokio::test]
async fn one_shot_text_response_yields_final_text() {
    let model = ScriptedMockProvider::new(vec![vec![
        ResponseEvent::TextDelta("hello".into()),
        ResponseEvent::TextDelta(" world".into()),
        ResponseEvent::Done,
    ]]);
    let coordinator = coordinator_with(model, new_broker());

    let result = coordinator.run("s1", "hi").await.unwrap();

    assert_eq!(result.text, "hello world");
    assert_eq!(result.finish_reason, FinishReason::EndTurn);
    assert!(!coordinator.is_session_busy("s1").await);
}

// ── Scenario B — tool call with approval ────────────────────────────────────

#[tokio::test]
async fn approved_tool_call_runs_and_feeds_back_into_the_turn() {
    let model = ScriptedMockProvider::tool_then_text(
        "tc-1",
        "shell",
        r#"{"shell_command":"echo a b c"}"#,
        "done",
    );
    let broker = new_broker();
    spawn_approver(broker.clone(), true);
    let coordinator = coordinator_with(model, broker);

    let result = coordinator.run("s1", "list things").await.unwrap();

    assert_eq!(result.text, "done");
    assert_eq!(result.finish_reason, FinishReason::EndTurn);
}

// ── Scenario C — tool call denied ───────────────────────────────────────────

#[tokio::test]
async fn denied_tool_call_surfaces_as_an_error_result_not_an_abort() {
    let model = ScriptedMockProvider::tool_then_text(
        "tc-1",
        "shell",
        r#"{"shell_command":"echo should not run"}"#,
        "acknowledged the denial",
    );
    let broker = new_broker();
    spawn_approver(broker.clone(), false);
    let coordinator = coordinator_with(model, broker);

    let result = coordinator.run("s1", "list things").await.unwrap();

    // The model still gets a turn after the denial; the turn itself does not abort.
    assert_eq!(result.text, "acknowledged the denial");
    assert_eq!(result.finish_reason, FinishReason::EndTurn);
}

// ── Scenario D — cancellation mid-stream ────────────────────────────────────

/// Emits a few text deltas, then stalls for a long time before `Done` — long
/// enough that a test can reliably cancel the turn while it's still open.
struct StallingProvider;

#[async_trait]
impl ModelProvider for StallingProvider {
    fn name(&self) -> &str {
        "stalling"
    }
    fn model_name(&self) -> &str {
        "stalling-mock-model"
    }
    async fn complete(&self, _req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let head = stream::iter(vec![
            Ok(ResponseEvent::TextDelta("first".into())),
            Ok(ResponseEvent::TextDelta(" second".into())),
            Ok(ResponseEvent::TextDelta(" third".into())),
        ]);
        let tail = stream::once(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(ResponseEvent::Done)
        });
        Ok(Box::pin(head.chain(tail)))
    }
}

#[tokio::test]
async fn cancel_mid_stream_finishes_the_run_with_cancelled_reason() {
    let factory: Arc<dyn AgentFactory> = Arc::new(TestFactory {
        config: Arc::new(Config::default()),
        broker: new_broker(),
    });
    let coordinator = Arc::new(Coordinator::new(
        factory,
        Arc::new(StallingProvider),
        AgentMode::Agent,
    ));

    let run_coordinator = coordinator.clone();
    let handle = tokio::spawn(async move { run_coordinator.run("s1", "go").await });

    // Give the driver a moment to pick the prompt up before cancelling it.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    coordinator.cancel("s1").await;

    let result = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("run should finish promptly after cancellation")
        .unwrap()
        .unwrap();

    assert_eq!(result.finish_reason, FinishReason::Cancelled);
    assert!(!coordinator.is_session_busy("s1").await);
}

// ── Scenario E — queued prompts ──────────────────────────────────────────────

#[tokio::test]
async fn queued_prompts_on_the_same_session_run_in_fifo_order() {
    let model = ScriptedMockProvider::new(vec![
        vec![ResponseEvent::TextDelta("first reply".into()), ResponseEvent::Done],
        vec![ResponseEvent::TextDelta("second reply".into()), ResponseEvent::Done],
    ]);
    let coordinator = Arc::new(coordinator_with(model, new_broker()));

    let c1 = coordinator.clone();
    let first = tokio::spawn(async move { c1.run("s1", "p1").await });
    let c2 = coordinator.clone();
    let second = tokio::spawn(async move { c2.run("s1", "p2").await });

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert_eq!(first.text, "first reply");
    assert_eq!(second.text, "second reply");
}

// ── Scenario F — subagent ────────────────────────────────────────────────────

#[tokio::test]
async fn subagent_run_reports_a_child_session_id_scoped_to_its_caller() {
    let model = ScriptedMockProvider::always_text("done");
    let coordinator = coordinator_with(model, new_broker());

    let result = coordinator
        .run_subagent("msg-1", "tc-7", "do the focused sub-task")
        .await
        .unwrap();

    assert_eq!(result.text, "done");
    assert_eq!(result.session_id, "msg-1$$tc-7");
    assert_eq!(result.finish_reason, FinishReason::EndTurn);
}
