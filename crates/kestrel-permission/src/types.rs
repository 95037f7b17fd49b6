// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// A pending ask raised by a tool before it performs a side effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: String,
    pub session_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    pub description: String,
    /// File or URL path the action targets, when applicable. Requests
    /// without a path (e.g. a pure compute tool) fall back to tool-name-only
    /// grant matching.
    pub path: Option<String>,
}

/// How long an installed grant remains valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantScope {
    /// Consumed by the first matching request.
    Once,
    /// Valid for the rest of the session.
    Session,
}

/// A standing approval installed by a `GrantPersistent` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub session_id: String,
    pub tool_name: String,
    pub path_prefix: Option<String>,
    pub scope: GrantScope,
}

impl PermissionGrant {
    /// `true` if this grant covers `req`.
    ///
    /// A grant with no `path_prefix` covers any request for the same tool in
    /// the same session. A request with no `path` falls back to a
    /// tool-name-only match regardless of the grant's own path prefix.
    pub fn covers(&self, req: &PermissionRequest) -> bool {
        if self.session_id != req.session_id || self.tool_name != req.tool_name {
            return false;
        }
        let Some(req_path) = &req.path else { return true };
        match &self.path_prefix {
            None => true,
            Some(prefix) => req_path == prefix || req_path.starts_with(&format!("{prefix}/")),
        }
    }
}

/// The three replies the approver may send for a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Grant,
    GrantPersistent,
    Deny,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
