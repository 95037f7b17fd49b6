// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Root of a conversation.
///
/// A session with a `parent_id` is either a *task session* (id equals the
/// originating tool-call id, derived as `"<parent-message-id>$$<tool-call-id>"`)
/// or a *title session* (id prefixed with `title-`). Counters are monotonic
/// within a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub parent_id: Option<String>,
    pub title: String,
    pub message_count: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
    pub todos: Vec<Todo>,
    pub summary_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// `true` if this session's id marks it as a title-generation session.
    pub fn is_title_session(&self) -> bool {
        self.id.starts_with("title-")
    }

    /// `true` if this session's id encodes a parent message / tool-call pair.
    pub fn is_task_session(&self) -> bool {
        self.id.contains("$$")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Todo {
    pub content: String,
    pub status: TodoStatus,
    pub active_form: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    EndTurn,
    ToolUse,
    Length,
    Cancelled,
    Error,
}

/// A single content part within a [`Message`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text { text: String },
    Reasoning { text: String },
    ToolCall {
        id: String,
        tool_name: String,
        arguments: String,
        finished: bool,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
        is_error: bool,
    },
    Finish { reason: FinishReason },
    Attachment {
        file_name: String,
        file_path: String,
        mime: String,
        /// Size of the underlying content in bytes; the bytes themselves
        /// live on disk at `file_path`, not in the store.
        bytes: u64,
    },
}

/// Ordered content unit within a session.
///
/// Invariant: every tool-call id appearing in this message has at most one
/// tool-result in some later tool message in the same session; a `Finish`
/// part appears at most once and terminates the message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// `true` if a `Finish` part is already present.
    pub fn is_finished(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, MessagePart::Finish { .. }))
    }
}

/// A versioned snapshot of a file as it stood at some point in a session.
///
/// Invariant: versions for a given (session, path) form a monotonically
/// increasing sequence starting at 1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryFile {
    pub session_id: String,
    pub path: String,
    pub version: u32,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_session_detected_by_prefix() {
        let s = Session {
            id: "title-abc".into(),
            parent_id: None,
            title: String::new(),
            message_count: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            cost_usd: 0.0,
            todos: vec![],
            summary_message_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(s.is_title_session());
        assert!(!s.is_task_session());
    }

    #[test]
    fn task_session_detected_by_dollar_marker() {
        let s = Session {
            id: "msg-1$$call-2".into(),
            parent_id: Some("parent-session".into()),
            title: String::new(),
            message_count: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            cost_usd: 0.0,
            todos: vec![],
            summary_message_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(s.is_task_session());
        assert!(!s.is_title_session());
    }

    #[test]
    fn message_is_finished_only_with_finish_part() {
        let mut m = Message {
            id: "m1".into(),
            session_id: "s1".into(),
            role: Role::Assistant,
            parts: vec![MessagePart::Text { text: "hi".into() }],
            created_at: Utc::now(),
        };
        assert!(!m.is_finished());
        m.parts.push(MessagePart::Finish { reason: FinishReason::EndTurn });
        assert!(m.is_finished());
    }

    #[test]
    fn role_round_trips_through_str() {
        for r in [Role::User, Role::Assistant, Role::Tool, Role::System] {
            assert_eq!(Role::parse(r.as_str()), Some(r));
        }
    }
}
