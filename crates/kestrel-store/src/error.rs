// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Errors raised at the Session Store's public boundary.
///
/// Every variant here surfaces to the Coordinator as the `storage` error
/// kind; the variants exist so callers can log or retry with the right
/// amount of detail rather than to change the outer classification.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("history file {path} has no version {version} for session {session_id}")]
    HistoryVersionNotFound {
        session_id: String,
        path: String,
        version: u32,
    },

    #[error("corrupt persisted JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("sqlite backend error: {0}")]
    Backend(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
