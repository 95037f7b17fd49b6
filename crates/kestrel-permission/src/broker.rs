// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use kestrel_bus::{Bus, EventKind};
use tokio::sync::oneshot;
use tracing::debug;

use crate::policy::{ApprovalPolicy, ToolPolicy};
use crate::types::{GrantScope, PermissionGrant, PermissionRequest, Resolution};

struct PendingEntry {
    request: PermissionRequest,
    reply: oneshot::Sender<Resolution>,
}

/// Single-writer arbiter between tool executions and the interactive approver.
///
/// Every request resolves exactly once: immediately (yolo, allow-list,
/// session auto-approval, or a matching grant) or by publishing a
/// `PermissionRequest` event and waiting for the approver's reply. A
/// cancelled caller unblocks with a denial rather than hanging forever.
pub struct PermissionBroker {
    policy: ToolPolicy,
    pending: Mutex<Vec<PendingEntry>>,
    grants: Mutex<Vec<PermissionGrant>>,
    auto_approved_sessions: Mutex<HashSet<String>>,
    skip_requests: AtomicBool,
    pub requests: Bus<PermissionRequest>,
}

impl PermissionBroker {
    pub fn new(policy: ToolPolicy) -> Self {
        Self {
            policy,
            pending: Mutex::new(Vec::new()),
            grants: Mutex::new(Vec::new()),
            auto_approved_sessions: Mutex::new(HashSet::new()),
            skip_requests: AtomicBool::new(false),
            requests: Bus::new(),
        }
    }

    /// Request approval for `req`. Blocks the caller until resolved.
    ///
    /// Returns `true` immediately without interactive involvement if: yolo
    /// mode is enabled, the tool/path matches an auto-approve pattern, the
    /// session has been auto-approved, or a matching grant already exists.
    /// Otherwise blocks on the approver's reply, or on `cancelled` firing
    /// first — whichever happens first unblocks the call.
    pub async fn request(&self, req: PermissionRequest, cancelled: oneshot::Receiver<()>) -> bool {
        if self.skip_requests.load(Ordering::Relaxed) {
            return true;
        }
        let subject = req.path.clone().unwrap_or_else(|| req.tool_name.clone());
        if self.policy.decide(&subject) == ApprovalPolicy::Auto {
            return true;
        }
        if self.auto_approved_sessions.lock().unwrap().contains(&req.session_id) {
            return true;
        }
        if let Some(scope) = self.consume_matching_grant(&req) {
            debug!(tool = %req.tool_name, ?scope, "permission request satisfied by standing grant");
            return true;
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().push(PendingEntry { request: req.clone(), reply: tx });
        self.requests.publish(EventKind::Created, req.clone());

        tokio::select! {
            res = rx => matches!(res, Ok(Resolution::Grant) | Ok(Resolution::GrantPersistent)),
            _ = cancelled => {
                self.pending.lock().unwrap().retain(|p| p.request.id != req.id);
                false
            }
        }
    }

    fn consume_matching_grant(&self, req: &PermissionRequest) -> Option<GrantScope> {
        let mut grants = self.grants.lock().unwrap();
        let idx = grants.iter().position(|g| g.covers(req))?;
        let scope = grants[idx].scope;
        if scope == GrantScope::Once {
            grants.remove(idx);
        }
        Some(scope)
    }

    /// Resolve a pending request with a one-time grant.
    pub fn grant(&self, request_id: &str) -> bool {
        self.resolve(request_id, Resolution::Grant)
    }

    /// Resolve a pending request with a grant and install a session-scoped
    /// standing grant matching its tool and path.
    pub fn grant_persistent(&self, request_id: &str) -> bool {
        let entry = {
            let mut pending = self.pending.lock().unwrap();
            let Some(idx) = pending.iter().position(|p| p.request.id == request_id) else {
                return false;
            };
            pending.remove(idx)
        };
        self.grants.lock().unwrap().push(PermissionGrant {
            session_id: entry.request.session_id.clone(),
            tool_name: entry.request.tool_name.clone(),
            path_prefix: entry.request.path.clone(),
            scope: GrantScope::Session,
        });
        let _ = entry.reply.send(Resolution::GrantPersistent);
        true
    }

    /// Deny a pending request.
    pub fn deny(&self, request_id: &str) -> bool {
        self.resolve(request_id, Resolution::Deny)
    }

    fn resolve(&self, request_id: &str, resolution: Resolution) -> bool {
        let mut pending = self.pending.lock().unwrap();
        let Some(idx) = pending.iter().position(|p| p.request.id == request_id) else {
            return false;
        };
        let entry = pending.remove(idx);
        let _ = entry.reply.send(resolution);
        true
    }

    /// Mark `session_id` as auto-approved for the remainder of its lifetime
    /// (non-interactive runs).
    pub fn auto_approve_session(&self, session_id: impl Into<String>) {
        self.auto_approved_sessions.lock().unwrap().insert(session_id.into());
    }

    /// Toggle "skip all requests" (yolo) mode.
    pub fn set_skip_requests(&self, skip: bool) {
        self.skip_requests.store(skip, Ordering::Relaxed);
    }

    /// Drop session-scoped grants and auto-approval state for a finished session.
    pub fn end_session(&self, session_id: &str) {
        self.grants.lock().unwrap().retain(|g| g.session_id != session_id);
        self.auto_approved_sessions.lock().unwrap().remove(session_id);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_config::ToolsConfig;

    fn broker() -> PermissionBroker {
        PermissionBroker::new(ToolPolicy::from_config(&ToolsConfig {
            auto_approve_patterns: vec![],
            deny_patterns: vec![],
            ..ToolsConfig::default()
        }))
    }

    fn req(id: &str, session: &str, tool: &str, path: Option<&str>) -> PermissionRequest {
        PermissionRequest {
            id: id.into(),
            session_id: session.into(),
            tool_call_id: format!("call-{id}"),
            tool_name: tool.into(),
            description: "do something".into(),
            path: path.map(String::from),
        }
    }

    #[tokio::test]
    async fn skip_requests_grants_immediately() {
        let b = broker();
        b.set_skip_requests(true);
        let (_tx, rx) = oneshot::channel();
        assert!(b.request(req("1", "s1", "shell", None), rx).await);
    }

    #[tokio::test]
    async fn auto_approved_session_grants_immediately() {
        let b = broker();
        b.auto_approve_session("s1");
        let (_tx, rx) = oneshot::channel();
        assert!(b.request(req("1", "s1", "shell", None), rx).await);
    }

    #[tokio::test]
    async fn unresolved_request_blocks_until_grant() {
        let b = std::sync::Arc::new(broker());
        let (_cancel_tx, cancel_rx) = oneshot::channel();
        let b2 = b.clone();
        let handle = tokio::spawn(async move { b2.request(req("1", "s1", "shell", None), cancel_rx).await });
        // Give the requester a chance to register before granting.
        tokio::task::yield_now().await;
        assert!(b.grant("1"));
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn deny_resolves_to_false() {
        let b = std::sync::Arc::new(broker());
        let (_cancel_tx, cancel_rx) = oneshot::channel();
        let b2 = b.clone();
        let handle = tokio::spawn(async move { b2.request(req("1", "s1", "shell", None), cancel_rx).await });
        tokio::task::yield_now().await;
        assert!(b.deny("1"));
        assert!(!handle.await.unwrap());
    }

    #[tokio::test]
    async fn grant_persistent_installs_standing_grant() {
        let b = std::sync::Arc::new(broker());
        let (_cancel_tx, cancel_rx) = oneshot::channel();
        let b2 = b.clone();
        let handle = tokio::spawn(async move {
            b2.request(req("1", "s1", "edit_file", Some("/workspace/a.rs")), cancel_rx).await
        });
        tokio::task::yield_now().await;
        assert!(b.grant_persistent("1"));
        assert!(handle.await.unwrap());

        // A second request for the same session/tool/path no longer needs approval.
        let (_tx2, rx2) = oneshot::channel();
        assert!(b.request(req("2", "s1", "edit_file", Some("/workspace/a.rs")), rx2).await);
    }

    #[tokio::test]
    async fn cancelled_request_resolves_to_denied() {
        let b = std::sync::Arc::new(broker());
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let b2 = b.clone();
        let handle = tokio::spawn(async move { b2.request(req("1", "s1", "shell", None), cancel_rx).await });
        tokio::task::yield_now().await;
        cancel_tx.send(()).unwrap();
        assert!(!handle.await.unwrap());
    }

    #[tokio::test]
    async fn end_session_clears_grants_and_auto_approval() {
        let b = broker();
        b.auto_approve_session("s1");
        b.end_session("s1");
        // now falls through to interactive (never resolved); use cancel to unblock deterministically.
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let b = std::sync::Arc::new(b);
        let b2 = b.clone();
        let handle = tokio::spawn(async move { b2.request(req("1", "s1", "shell", None), cancel_rx).await });
        tokio::task::yield_now().await;
        cancel_tx.send(()).unwrap();
        assert!(!handle.await.unwrap());
    }
}
