// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Multi-session agent coordinator.
//!
//! [`Agent`] drives a single conversation. [`Coordinator`] owns one agent
//! worker per session, a FIFO prompt queue per session, and a shared subagent
//! pool, so that multiple chats (and the sub-agents they spawn) can run
//! concurrently without stepping on each other's history or permissions.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tracing::{debug, warn};

use kestrel_config::AgentMode;
use kestrel_model::ModelProvider;

use crate::agent::Agent;
use crate::events::AgentEvent;

/// Builds the [`Agent`]s a [`Coordinator`] manages.
///
/// Kept as an injected trait (rather than depending on `kestrel-bootstrap`'s
/// concrete `AgentBuilder` directly) to avoid a circular crate dependency:
/// `kestrel-bootstrap` already depends on `kestrel-core`.
pub trait AgentFactory: Send + Sync {
    /// Build a top-level agent for a new session.
    fn build(&self, mode: AgentMode, model: Arc<dyn ModelProvider>) -> Agent;
    /// Build a reduced-tool-set agent for a subagent delegation.
    fn build_subagent(&self, mode: AgentMode, model: Arc<dyn ModelProvider>) -> Agent;
}

/// Outcome of a completed turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    EndTurn,
    Cancelled,
    Error,
}

/// Result of one `run()` call: the assistant's final text for that turn.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub session_id: String,
    pub text: String,
    pub finish_reason: FinishReason,
}

/// Errors `Coordinator` operations can return.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("session '{0}' not found")]
    SessionNotFound(String),
    #[error("subagent nesting depth exceeded")]
    DepthExceeded,
    #[error("queue cleared before this prompt ran")]
    QueueCleared,
    #[error("coordinator shutting down")]
    ShuttingDown,
    #[error(transparent)]
    Agent(#[from] anyhow::Error),
}

struct QueueItem {
    prompt: String,
    reply: oneshot::Sender<Result<AgentResult, CoordinatorError>>,
}

/// Per-session queue plus the bookkeeping `cancel`/observability need.
struct SessionQueue {
    items: Mutex<VecDeque<QueueItem>>,
    notify: Notify,
    busy: AtomicBool,
    /// Cancel sender for the turn currently in flight, if any.
    cancel: Mutex<Option<oneshot::Sender<()>>>,
}

impl SessionQueue {
    fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            busy: AtomicBool::new(false),
            cancel: Mutex::new(None),
        }
    }
}

/// A running session: its agent plus its queue/driver state.
struct SessionWorker {
    agent: Arc<Mutex<Agent>>,
    queue: Arc<SessionQueue>,
    /// Keeps the background driver task alive for the life of the session;
    /// dropping it aborts the driver.
    #[allow(dead_code)]
    driver: tokio::task::JoinHandle<()>,
}

/// Owns every session's [`Agent`] and drives its turns.
///
/// `run()` always returns only once the caller's own prompt has finished,
/// even if other prompts were queued ahead of or after it.
pub struct Coordinator {
    factory: Arc<dyn AgentFactory>,
    model: Mutex<Arc<dyn ModelProvider>>,
    mode: Mutex<AgentMode>,
    sessions: Mutex<HashMap<String, SessionWorker>>,
    subagent_depth: Arc<AtomicUsize>,
}

const MAX_SUBAGENT_DEPTH: usize = 3;

impl Coordinator {
    pub fn new(factory: Arc<dyn AgentFactory>, model: Arc<dyn ModelProvider>, mode: AgentMode) -> Self {
        Self {
            factory,
            model: Mutex::new(model),
            mode: Mutex::new(mode),
            sessions: Mutex::new(HashMap::new()),
            subagent_depth: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Enqueue `prompt` on `session_id` and block until its turn completes.
    /// If a turn is already running for this session, the prompt is appended
    /// to the session's queue and processed FIFO.
    pub async fn run(&self, session_id: &str, prompt: &str) -> Result<AgentResult, CoordinatorError> {
        let queue = self.worker_for(session_id).await.queue;
        let (reply, rx) = oneshot::channel();
        queue.items.lock().await.push_back(QueueItem {
            prompt: prompt.to_string(),
            reply,
        });
        queue.notify.notify_one();
        rx.await.unwrap_or(Err(CoordinatorError::ShuttingDown))
    }

    /// Get or create the session's worker (agent + driver task).
    async fn worker_for(&self, session_id: &str) -> WorkerHandle {
        let mut sessions = self.sessions.lock().await;
        if let Some(w) = sessions.get(session_id) {
            return WorkerHandle { queue: Arc::clone(&w.queue) };
        }

        let model = self.model.lock().await.clone();
        let mode = *self.mode.lock().await;
        let mut agent = self.factory.build(mode, model);
        agent.set_session_id(session_id.to_string());
        let agent = Arc::new(Mutex::new(agent));
        let queue = Arc::new(SessionQueue::new());

        let driver = tokio::spawn(Self::drive(Arc::clone(&agent), Arc::clone(&queue)));

        let handle = WorkerHandle { queue: Arc::clone(&queue) };
        sessions.insert(
            session_id.to_string(),
            SessionWorker { agent, queue, driver },
        );
        handle
    }

    /// Background driver loop: pulls prompts off the queue one at a time and
    /// runs a full turn for each, replying to the caller once it finishes.
    async fn drive(agent: Arc<Mutex<Agent>>, queue: Arc<SessionQueue>) {
        loop {
            let item = loop {
                if let Some(item) = queue.items.lock().await.pop_front() {
                    break item;
                }
                queue.notify.notified().await;
            };

            queue.busy.store(true, Ordering::SeqCst);
            let (cancel_tx, cancel_rx) = oneshot::channel();
            *queue.cancel.lock().await = Some(cancel_tx);

            let result = {
                let mut agent = agent.lock().await;
                let session_id = agent.session_id().to_string();
                let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
                let submit = agent.submit_with_cancel(&item.prompt, tx, cancel_rx);
                let (submit_result, collected) = Self::collect(submit, &mut rx).await;
                Self::finish_result(session_id, submit_result, collected)
            };

            queue.cancel.lock().await.take();
            queue.busy.store(false, Ordering::SeqCst);
            let _ = item.reply.send(result);
        }
    }

    /// Drive a submit future to completion while draining its event channel
    /// for the final text and whether the turn was aborted.
    async fn collect(
        submit: impl std::future::Future<Output = anyhow::Result<()>>,
        rx: &mut mpsc::Receiver<AgentEvent>,
    ) -> (anyhow::Result<()>, CollectedTurn) {
        tokio::pin!(submit);
        let mut collected = CollectedTurn::default();
        loop {
            tokio::select! {
                res = &mut submit => {
                    while let Ok(ev) = rx.try_recv() {
                        collected.observe(ev);
                    }
                    return (res, collected);
                }
                Some(ev) = rx.recv() => {
                    collected.observe(ev);
                }
            }
        }
    }

    fn finish_result(
        session_id: String,
        submit_result: anyhow::Result<()>,
        collected: CollectedTurn,
    ) -> Result<AgentResult, CoordinatorError> {
        if let Err(e) = submit_result {
            return Err(CoordinatorError::Agent(e));
        }
        let finish_reason = if collected.aborted {
            FinishReason::Cancelled
        } else {
            FinishReason::EndTurn
        };
        Ok(AgentResult { session_id, text: collected.text, finish_reason })
    }

    /// Cancel the in-flight turn for `session_id`, if any.
    pub async fn cancel(&self, session_id: &str) {
        let queue = {
            let sessions = self.sessions.lock().await;
            sessions.get(session_id).map(|w| Arc::clone(&w.queue))
        };
        if let Some(queue) = queue {
            if let Some(tx) = queue.cancel.lock().await.take() {
                let _ = tx.send(());
            }
        }
    }

    /// Cancel every in-flight turn across every session (shutdown path).
    pub async fn cancel_all(&self) {
        let ids: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        for id in ids {
            self.cancel(&id).await;
        }
    }

    /// Discard queued prompts for `session_id` without cancelling the
    /// currently running turn.
    pub async fn clear_queue(&self, session_id: &str) {
        let queue = {
            let sessions = self.sessions.lock().await;
            sessions.get(session_id).map(|w| Arc::clone(&w.queue))
        };
        let Some(queue) = queue else { return };
        let drained: Vec<QueueItem> = queue.items.lock().await.drain(..).collect();
        for item in drained {
            let _ = item.reply.send(Err(CoordinatorError::QueueCleared));
        }
    }

    /// Number of prompts currently queued (not counting the running turn).
    pub async fn queued_prompts(&self, session_id: &str) -> usize {
        let sessions = self.sessions.lock().await;
        match sessions.get(session_id) {
            Some(w) => w.queue.items.lock().await.len(),
            None => 0,
        }
    }

    /// The queued prompt texts, in FIFO order.
    pub async fn queued_prompts_list(&self, session_id: &str) -> Vec<String> {
        let sessions = self.sessions.lock().await;
        match sessions.get(session_id) {
            Some(w) => w.queue.items.lock().await.iter().map(|i| i.prompt.clone()).collect(),
            None => Vec::new(),
        }
    }

    /// `true` while a turn is actively streaming for `session_id`.
    pub async fn is_session_busy(&self, session_id: &str) -> bool {
        let sessions = self.sessions.lock().await;
        match sessions.get(session_id) {
            Some(w) => w.queue.busy.load(Ordering::SeqCst),
            None => false,
        }
    }

    /// `true` if any session has a turn in flight.
    pub async fn is_busy(&self) -> bool {
        let sessions = self.sessions.lock().await;
        for w in sessions.values() {
            if w.queue.busy.load(Ordering::SeqCst) {
                return true;
            }
        }
        false
    }

    /// Replace the session's context with a compacted summary.
    ///
    /// Runs inline rather than through the queue's driver: summarization is
    /// idempotent and safe to run between turns, and queuing it would block
    /// on whatever prompt is already ahead of it.
    pub async fn summarize(&self, session_id: &str) -> Result<(), CoordinatorError> {
        let agent = {
            let sessions = self.sessions.lock().await;
            sessions
                .get(session_id)
                .map(|w| Arc::clone(&w.agent))
                .ok_or_else(|| CoordinatorError::SessionNotFound(session_id.to_string()))?
        };
        let (tx, _rx) = mpsc::channel::<AgentEvent>(16);
        agent.lock().await.force_summarize(&tx).await?;
        Ok(())
    }

    /// Rebind the coordinator to the currently configured model, without
    /// touching sessions whose turn has already begun streaming against the
    /// old model (they finish on whichever model they started with).
    pub async fn update_models(&self, model: Arc<dyn ModelProvider>) {
        *self.model.lock().await = Arc::clone(&model);
        let sessions = self.sessions.lock().await;
        for w in sessions.values() {
            if !w.queue.busy.load(Ordering::SeqCst) {
                w.agent.lock().await.set_model(Arc::clone(&model));
            }
        }
    }

    /// Run a bounded-depth subagent and return its final text.
    ///
    /// `parent_message_id`/`tool_call_id` address the child session as
    /// `parent_message_id$$tool_call_id` so the UI can resolve nesting; the
    /// child session is otherwise independent (its own history, its own
    /// queue) and is discarded once the subagent returns.
    pub async fn run_subagent(
        &self,
        parent_message_id: &str,
        tool_call_id: &str,
        prompt: &str,
    ) -> Result<AgentResult, CoordinatorError> {
        let depth = self.subagent_depth.fetch_add(1, Ordering::SeqCst) + 1;
        if depth > MAX_SUBAGENT_DEPTH {
            self.subagent_depth.fetch_sub(1, Ordering::SeqCst);
            return Err(CoordinatorError::DepthExceeded);
        }

        let child_session_id = format!("{parent_message_id}$${tool_call_id}");
        let model = self.model.lock().await.clone();
        let mode = *self.mode.lock().await;
        let mut agent = self.factory.build_subagent(mode, model);
        agent.set_session_id(child_session_id.clone());

        let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
        let submit = agent.submit(prompt, tx);
        let (submit_result, collected) = Self::collect(submit, &mut rx).await;

        self.subagent_depth.fetch_sub(1, Ordering::SeqCst);

        match submit_result {
            Ok(()) => Ok(AgentResult {
                session_id: child_session_id,
                text: collected.text,
                finish_reason: if collected.aborted { FinishReason::Cancelled } else { FinishReason::EndTurn },
            }),
            Err(e) => {
                warn!(session_id = %child_session_id, error = %e, "subagent turn failed");
                Err(CoordinatorError::Agent(e))
            }
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        debug!("coordinator dropped; abandoning session driver tasks");
    }
}

/// A borrowed handle to a session's queue, used only inside `run()` so the
/// `sessions` map lock is not held across the `.await` on the reply channel.
struct WorkerHandle {
    queue: Arc<SessionQueue>,
}

#[derive(Default)]
struct CollectedTurn {
    text: String,
    aborted: bool,
}

impl CollectedTurn {
    fn observe(&mut self, ev: AgentEvent) {
        match ev {
            AgentEvent::TextComplete(t) => self.text = t,
            AgentEvent::Aborted { partial_text } => {
                self.aborted = true;
                if self.text.is_empty() {
                    self.text = partial_text;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_config::AgentConfig;
    use kestrel_model::ScriptedMockProvider;
    use kestrel_tools::ToolRegistry;

    /// Builds agents against whatever `ScriptedMockProvider` the test hands
    /// it; both top-level and subagent builds share the same tool set.
    struct TestFactory;

    impl AgentFactory for TestFactory {
        fn build(&self, mode: AgentMode, model: Arc<dyn ModelProvider>) -> Agent {
            let mode_lock = Arc::new(Mutex::new(mode));
            let (_tx, tool_event_rx) = mpsc::channel(64);
            Agent::new(
                model,
                Arc::new(ToolRegistry::default()),
                Arc::new(AgentConfig::default()),
                crate::AgentRuntimeContext::default(),
                mode_lock,
                tool_event_rx,
                128_000,
            )
        }

        fn build_subagent(&self, mode: AgentMode, model: Arc<dyn ModelProvider>) -> Agent {
            self.build(mode, model)
        }
    }

    fn coordinator_with(model: ScriptedMockProvider) -> Coordinator {
        Coordinator::new(Arc::new(TestFactory), Arc::new(model), AgentMode::Agent)
    }

    #[tokio::test]
    async fn run_returns_final_text_for_a_new_session() {
        let coordinator = coordinator_with(ScriptedMockProvider::always_text("hello there"));
        let result = coordinator.run("s1", "hi").await.unwrap();
        assert_eq!(result.text, "hello there");
        assert_eq!(result.finish_reason, FinishReason::EndTurn);
        assert!(!coordinator.is_session_busy("s1").await);
    }

    #[tokio::test]
    async fn two_sessions_keep_independent_history() {
        let model = ScriptedMockProvider::new(vec![
            vec![kestrel_model::ResponseEvent::TextDelta("for s1".into()), kestrel_model::ResponseEvent::Done],
            vec![kestrel_model::ResponseEvent::TextDelta("for s2".into()), kestrel_model::ResponseEvent::Done],
        ]);
        let coordinator = coordinator_with(model);

        let r1 = coordinator.run("s1", "hi").await.unwrap();
        let r2 = coordinator.run("s2", "hi").await.unwrap();

        assert_eq!(r1.session_id, "s1");
        assert_eq!(r2.session_id, "s2");
    }

    #[tokio::test]
    async fn queued_prompts_run_fifo_on_the_same_session() {
        let model = ScriptedMockProvider::new(vec![
            vec![kestrel_model::ResponseEvent::TextDelta("first".into()), kestrel_model::ResponseEvent::Done],
            vec![kestrel_model::ResponseEvent::TextDelta("second".into()), kestrel_model::ResponseEvent::Done],
        ]);
        let coordinator = coordinator_with(model);

        let r1 = coordinator.run("s1", "one").await.unwrap();
        let r2 = coordinator.run("s1", "two").await.unwrap();

        assert_eq!(r1.text, "first");
        assert_eq!(r2.text, "second");
    }

    #[tokio::test]
    async fn clear_queue_resolves_pending_items_with_an_error() {
        // A queue can only ever be drained between the enqueue and the
        // driver's next pop — exercise the drain path directly rather than
        // racing a real driver task for it.
        let queue = SessionQueue::new();
        let (reply, rx) = oneshot::channel();
        queue.items.lock().await.push_back(QueueItem { prompt: "queued".into(), reply });

        let drained: Vec<QueueItem> = queue.items.lock().await.drain(..).collect();
        for item in drained {
            let _ = item.reply.send(Err(CoordinatorError::QueueCleared));
        }

        match rx.await.unwrap() {
            Err(CoordinatorError::QueueCleared) => {}
            other => panic!("expected QueueCleared, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn is_session_busy_false_for_unknown_session() {
        let coordinator = coordinator_with(ScriptedMockProvider::always_text("x"));
        assert!(!coordinator.is_session_busy("nope").await);
        assert_eq!(coordinator.queued_prompts("nope").await, 0);
    }

    #[tokio::test]
    async fn summarize_unknown_session_errors() {
        let coordinator = coordinator_with(ScriptedMockProvider::always_text("x"));
        let err = coordinator.summarize("nope").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn run_subagent_returns_child_result() {
        let coordinator = coordinator_with(ScriptedMockProvider::always_text("sub reply"));
        let result = coordinator.run_subagent("msg-1", "tc-1", "do a thing").await.unwrap();
        assert_eq!(result.text, "sub reply");
        assert_eq!(result.session_id, "msg-1$$tc-1");
    }
}
