// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use kestrel_bus::{Bus, EventKind};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::types::{HistoryFile, Message, Role, Session, Todo};

/// Publish-capable buses for each persisted record type.
///
/// One `Bus<T>` per payload type, per [`kestrel_bus::Bus`]'s own
/// recommendation, so a UI that only cares about session list changes never
/// pays for message-level event volume.
#[derive(Default)]
pub struct StoreBuses {
    pub sessions: Bus<Session>,
    pub messages: Bus<Message>,
    pub history_files: Bus<HistoryFile>,
}

/// Transactional session store backed by SQLite.
///
/// Every mutation executes inside a single transaction touching at most the
/// current session and its dependents, and publishes exactly one event on
/// commit; a failed transaction publishes nothing. Concurrent calls from
/// multiple tasks are safe: SQLite's own locking resolves contention, and the
/// Coordinator is expected to serialize its own writes per session on top of
/// that.
pub struct SessionStore {
    conn: Mutex<Connection>,
    pub buses: StoreBuses,
}

impl SessionStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self { conn: Mutex::new(conn), buses: StoreBuses::default() };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn), buses: StoreBuses::default() };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id                  TEXT PRIMARY KEY,
                parent_id           TEXT,
                title               TEXT NOT NULL,
                message_count       INTEGER NOT NULL DEFAULT 0,
                prompt_tokens       INTEGER NOT NULL DEFAULT 0,
                completion_tokens   INTEGER NOT NULL DEFAULT 0,
                cost_usd            REAL NOT NULL DEFAULT 0.0,
                todos_json          TEXT NOT NULL DEFAULT '[]',
                summary_message_id  TEXT,
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id          TEXT PRIMARY KEY,
                session_id  TEXT NOT NULL,
                role        TEXT NOT NULL,
                parts_json  TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            );

            CREATE TABLE IF NOT EXISTS history_files (
                session_id  TEXT NOT NULL,
                path        TEXT NOT NULL,
                version     INTEGER NOT NULL,
                content     TEXT NOT NULL,
                timestamp   TEXT NOT NULL,
                PRIMARY KEY (session_id, path, version),
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_parent ON sessions(parent_id);
            CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_history_session_path ON history_files(session_id, path);
            "#,
        )?;
        Ok(())
    }

    // ── Sessions ──────────────────────────────────────────────────────────────

    pub fn create_session(&self, id: Option<String>, parent_id: Option<String>) -> Result<Session> {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();
        let session = Session {
            id: id.clone(),
            parent_id,
            title: String::new(),
            message_count: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            cost_usd: 0.0,
            todos: vec![],
            summary_message_id: None,
            created_at: now,
            updated_at: now,
        };
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                r#"
                INSERT INTO sessions
                    (id, parent_id, title, message_count, prompt_tokens, completion_tokens,
                     cost_usd, todos_json, summary_message_id, created_at, updated_at)
                VALUES (?1, ?2, ?3, 0, 0, 0, 0.0, '[]', NULL, ?4, ?4)
                "#,
                params![session.id, session.parent_id, session.title, now.to_rfc3339()],
            )?;
        }
        self.buses.sessions.publish(EventKind::Created, session.clone());
        Ok(session)
    }

    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock().unwrap();
        row_to_session_opt(&conn, id)
    }

    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, parent_id, title, message_count, prompt_tokens, completion_tokens, \
             cost_usd, todos_json, summary_message_id, created_at, updated_at \
             FROM sessions ORDER BY updated_at DESC",
        )?;
        let rows = stmt
            .query_map([], session_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(|r| r.map_err(StoreError::from)).collect()
    }

    /// Atomically update the title and usage counters.
    ///
    /// Must be atomic rather than read-modify-write: title generation and a
    /// generation step may complete concurrently against the same session.
    pub fn update_session_title_and_usage(
        &self,
        id: &str,
        title: Option<&str>,
        prompt_tokens: u64,
        completion_tokens: u64,
        cost_usd: f64,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let changed = {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                r#"
                UPDATE sessions SET
                    title             = COALESCE(?2, title),
                    prompt_tokens     = prompt_tokens + ?3,
                    completion_tokens = completion_tokens + ?4,
                    cost_usd          = cost_usd + ?5,
                    updated_at        = ?6
                WHERE id = ?1
                "#,
                params![id, title, prompt_tokens, completion_tokens, cost_usd, now],
            )?
        };
        if changed == 0 {
            return Err(StoreError::SessionNotFound(id.to_string()));
        }
        let updated = self.get_session(id)?.ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;
        self.buses.sessions.publish(EventKind::Updated, updated);
        Ok(())
    }

    pub fn update_session_todos(&self, id: &str, todos: Vec<Todo>) -> Result<()> {
        let todos_json = serde_json::to_string(&todos)?;
        let now = Utc::now().to_rfc3339();
        let changed = {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE sessions SET todos_json = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, todos_json, now],
            )?
        };
        if changed == 0 {
            return Err(StoreError::SessionNotFound(id.to_string()));
        }
        let updated = self.get_session(id)?.ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;
        self.buses.sessions.publish(EventKind::Updated, updated);
        Ok(())
    }

    pub fn set_summary_message(&self, id: &str, message_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let changed = {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE sessions SET summary_message_id = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, message_id, now],
            )?
        };
        if changed == 0 {
            return Err(StoreError::SessionNotFound(id.to_string()));
        }
        let updated = self.get_session(id)?.ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;
        self.buses.sessions.publish(EventKind::Updated, updated);
        Ok(())
    }

    /// Delete a session and cascade to its messages, history files, and
    /// descendant sessions, in one transaction.
    pub fn delete_session(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let descendants: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM sessions WHERE parent_id = ?1")?;
            stmt.query_map(params![id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };

        for child in &descendants {
            tx.execute("DELETE FROM messages WHERE session_id = ?1", params![child])?;
            tx.execute("DELETE FROM history_files WHERE session_id = ?1", params![child])?;
            tx.execute("DELETE FROM sessions WHERE id = ?1", params![child])?;
        }

        tx.execute("DELETE FROM messages WHERE session_id = ?1", params![id])?;
        tx.execute("DELETE FROM history_files WHERE session_id = ?1", params![id])?;
        let changed = tx.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;

        if changed == 0 {
            // `tx` drops here without a commit, rolling back the cascade above.
            return Err(StoreError::SessionNotFound(id.to_string()));
        }
        tx.commit()?;
        drop(conn);

        self.buses.sessions.publish(
            EventKind::Deleted,
            Session {
                id: id.to_string(),
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
            },
        );
        Ok(())
    }

    // ── Messages ──────────────────────────────────────────────────────────────

    pub fn append_message(
        &self,
        session_id: &str,
        role: Role,
        parts: Vec<crate::types::MessagePart>,
    ) -> Result<Message> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let parts_json = serde_json::to_string(&parts)?;
        let message = Message { id: id.clone(), session_id: session_id.to_string(), role, parts, created_at: now };

        {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, session_id, role, parts_json, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![message.id, message.session_id, role.as_str(), parts_json, now.to_rfc3339()],
            )?;
            let changed = tx.execute(
                "UPDATE sessions SET message_count = message_count + 1, updated_at = ?2 WHERE id = ?1",
                params![session_id, now.to_rfc3339()],
            )?;
            if changed == 0 {
                return Err(StoreError::SessionNotFound(session_id.to_string()));
            }
            tx.commit()?;
        }
        self.buses.messages.publish(EventKind::Created, message.clone());
        Ok(message)
    }

    pub fn get_message(&self, id: &str) -> Result<Option<Message>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, session_id, role, parts_json, created_at FROM messages WHERE id = ?1",
            params![id],
            message_from_row,
        )
        .optional()
        .map_err(StoreError::from)?
        .map(|r| r.map_err(StoreError::from))
        .transpose()
    }

    pub fn list_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, parts_json, created_at FROM messages \
             WHERE session_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id], message_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(|r| r.map_err(StoreError::from)).collect()
    }

    /// Replace the full part list of an existing message, e.g. to mark a
    /// tool-call finished or append a streamed text delta.
    pub fn replace_message_parts(&self, id: &str, parts: Vec<crate::types::MessagePart>) -> Result<Message> {
        let parts_json = serde_json::to_string(&parts)?;
        let changed = {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE messages SET parts_json = ?2 WHERE id = ?1",
                params![id, parts_json],
            )?
        };
        if changed == 0 {
            return Err(StoreError::MessageNotFound(id.to_string()));
        }
        let updated = self.get_message(id)?.ok_or_else(|| StoreError::MessageNotFound(id.to_string()))?;
        self.buses.messages.publish(EventKind::Updated, updated.clone());
        Ok(updated)
    }

    // ── History files ─────────────────────────────────────────────────────────

    /// Append a new version of `path` within `session_id`. Versions start at
    /// 1 and increase monotonically per (session, path).
    pub fn add_history_file_version(
        &self,
        session_id: &str,
        path: &str,
        content: String,
    ) -> Result<HistoryFile> {
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        let next_version: u32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) + 1 FROM history_files WHERE session_id = ?1 AND path = ?2",
                params![session_id, path],
                |row| row.get(0),
            )?;
        conn.execute(
            "INSERT INTO history_files (session_id, path, version, content, timestamp) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session_id, path, next_version, content, now.to_rfc3339()],
        )?;
        drop(conn);

        let file = HistoryFile {
            session_id: session_id.to_string(),
            path: path.to_string(),
            version: next_version,
            content,
            timestamp: now,
        };
        self.buses.history_files.publish(EventKind::Created, file.clone());
        Ok(file)
    }

    pub fn list_history_file_versions(&self, session_id: &str, path: &str) -> Result<Vec<HistoryFile>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT session_id, path, version, content, timestamp FROM history_files \
             WHERE session_id = ?1 AND path = ?2 ORDER BY version ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id, path], history_file_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(|r| r.map_err(StoreError::from)).collect()
    }

    pub fn get_history_file_version(
        &self,
        session_id: &str,
        path: &str,
        version: u32,
    ) -> Result<HistoryFile> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT session_id, path, version, content, timestamp FROM history_files \
             WHERE session_id = ?1 AND path = ?2 AND version = ?3",
            params![session_id, path, version],
            history_file_from_row,
        )
        .optional()?
        .map(|r| r.map_err(StoreError::from))
        .transpose()?
        .ok_or_else(|| StoreError::HistoryVersionNotFound {
            session_id: session_id.to_string(),
            path: path.to_string(),
            version,
        })
    }
}

fn row_to_session_opt(conn: &Connection, id: &str) -> Result<Option<Session>> {
    conn.query_row(
        "SELECT id, parent_id, title, message_count, prompt_tokens, completion_tokens, \
         cost_usd, todos_json, summary_message_id, created_at, updated_at \
         FROM sessions WHERE id = ?1",
        params![id],
        session_from_row,
    )
    .optional()
    .map_err(StoreError::from)?
    .map(|r| r.map_err(StoreError::from))
    .transpose()
}

fn session_from_row(row: &rusqlite::Row) -> rusqlite::Result<std::result::Result<Session, StoreError>> {
    let todos_json: String = row.get(7)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;
    Ok((|| -> std::result::Result<Session, StoreError> {
        Ok(Session {
            id: row.get(0)?,
            parent_id: row.get(1)?,
            title: row.get(2)?,
            message_count: row.get::<_, i64>(3)? as u64,
            prompt_tokens: row.get::<_, i64>(4)? as u64,
            completion_tokens: row.get::<_, i64>(5)? as u64,
            cost_usd: row.get(6)?,
            todos: serde_json::from_str(&todos_json)?,
            summary_message_id: row.get(8)?,
            created_at: parse_rfc3339(&created_at)?,
            updated_at: parse_rfc3339(&updated_at)?,
        })
    })())
}

fn message_from_row(row: &rusqlite::Row) -> rusqlite::Result<std::result::Result<Message, StoreError>> {
    let role: String = row.get(2)?;
    let parts_json: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    Ok((|| -> std::result::Result<Message, StoreError> {
        Ok(Message {
            id: row.get(0)?,
            session_id: row.get(1)?,
            role: Role::parse(&role).unwrap_or(Role::System),
            parts: serde_json::from_str(&parts_json)?,
            created_at: parse_rfc3339(&created_at)?,
        })
    })())
}

fn history_file_from_row(
    row: &rusqlite::Row,
) -> rusqlite::Result<std::result::Result<HistoryFile, StoreError>> {
    let timestamp: String = row.get(4)?;
    Ok((|| -> std::result::Result<HistoryFile, StoreError> {
        Ok(HistoryFile {
            session_id: row.get(0)?,
            path: row.get(1)?,
            version: row.get::<_, i64>(2)? as u32,
            content: row.get(3)?,
            timestamp: parse_rfc3339(&timestamp)?,
        })
    })())
}

fn parse_rfc3339(s: &str) -> std::result::Result<chrono::DateTime<Utc>, StoreError> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(rusqlite::Error::InvalidColumnType(
            0,
            format!("bad timestamp {s}: {e}"),
            rusqlite::types::Type::Text,
        )))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
