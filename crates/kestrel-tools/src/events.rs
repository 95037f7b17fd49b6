// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use kestrel_config::AgentMode;

/// A structured todo item managed by the todo_write tool.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    /// One of: "pending", "in_progress", "completed", "cancelled"
    pub status: String,
}

/// Events emitted by tools to communicate state changes back to the
/// Coordinator. The Coordinator republishes these on the Event Bus for UI
/// subscribers.
#[derive(Debug)]
pub enum ToolEvent {
    TodoUpdate(Vec<TodoItem>),
    ModeChanged(AgentMode),
}
