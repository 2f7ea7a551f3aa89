mod conversations;
mod events;
mod retention;
mod runs;
pub mod types;

use anyhow::Result;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tracing::info;

pub use retention::RetentionPolicy;
pub use types::{
    Admission, AgentAnswer, Conversation, EventNotice, PruneReport, RequestIntake, RequestStart,
    StoredEvent, Turn,
};

use crate::core::error::{WorkflowError, WorkflowResult};
use crate::core::workflow::{ConversationStatus, EventPayload, Run, RunStatus, timestamp};

const NOTICE_CAPACITY: usize = 1024;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS conversations (
    conversation_id TEXT PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'active',
    summary TEXT,
    preferences_json TEXT NOT NULL DEFAULT '{}',
    active_run_id TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS workflow_runs (
    run_id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL REFERENCES conversations(conversation_id) ON DELETE CASCADE,
    message_id TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL,
    user_input TEXT NOT NULL,
    allow_clarification INTEGER NOT NULL,
    checkpoint_json TEXT NOT NULL,
    final_output_json TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_conversation_status
    ON workflow_runs(conversation_id, status);

CREATE UNIQUE INDEX IF NOT EXISTS idx_runs_single_active
    ON workflow_runs(conversation_id)
    WHERE status IN ('running', 'waiting_for_input');

CREATE TABLE IF NOT EXISTS conversation_turns (
    message_id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL REFERENCES conversations(conversation_id) ON DELETE CASCADE,
    run_id TEXT NOT NULL UNIQUE,
    user_input TEXT NOT NULL,
    clarifications_json TEXT NOT NULL,
    subqueries_json TEXT NOT NULL,
    retrieval_json TEXT NOT NULL,
    agent_answer TEXT,
    agent_reasoning TEXT,
    agent_tool_calls_json TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_turns_conversation_created
    ON conversation_turns(conversation_id, created_at);

CREATE TABLE IF NOT EXISTS workflow_events (
    cursor INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL REFERENCES conversations(conversation_id) ON DELETE CASCADE,
    run_id TEXT,
    message_id TEXT,
    kind TEXT NOT NULL,
    message TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    is_final INTEGER NOT NULL DEFAULT 0,
    is_error INTEGER NOT NULL DEFAULT 0,
    ends_stream INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_conversation_cursor
    ON workflow_events(conversation_id, cursor);

CREATE INDEX IF NOT EXISTS idx_events_final
    ON workflow_events(conversation_id, cursor)
    WHERE is_final = 1;

CREATE INDEX IF NOT EXISTS idx_events_stream_end
    ON workflow_events(conversation_id, cursor)
    WHERE ends_stream = 1;
";

/// Durable home of conversations, runs, turns and the event log.
#[derive(Clone)]
pub struct WorkflowStore {
    db: Arc<Mutex<Connection>>,
    notices: broadcast::Sender<EventNotice>,
}

impl WorkflowStore {
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let conn = Connection::open(db_path)?;
        let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get(0)
        })?;
        info!("Opened workflow store at {} (journal={})", db_path.display(), mode);
        Self::from_connection(conn)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            notices,
        })
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<EventNotice> {
        self.notices.subscribe()
    }

    fn publish(&self, events: &[&StoredEvent]) {
        for event in events {
            // No receivers just means nobody is streaming right now.
            let _ = self.notices.send(EventNotice {
                conversation_id: event.conversation_id.clone(),
                cursor: event.cursor,
            });
        }
    }
}

/// In-memory store for tests.
#[cfg(test)]
pub fn test_store() -> WorkflowStore {
    WorkflowStore::in_memory().expect("open in-memory workflow store")
}

// --- Row helpers shared by the store submodules ---

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_json_column<T: DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn run_status_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<RunStatus> {
    let raw: String = row.get(idx)?;
    RunStatus::from_status(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown run status '{}'", raw).into(),
        )
    })
}

const RUN_COLUMNS: &str = "run_id, conversation_id, message_id, status, user_input, allow_clarification,
     checkpoint_json, final_output_json, error, created_at, updated_at";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<Run> {
    Ok(Run {
        run_id: row.get(0)?,
        conversation_id: row.get(1)?,
        message_id: row.get(2)?,
        status: run_status_column(row, 3)?,
        user_input: row.get(4)?,
        allow_clarification: row.get(5)?,
        checkpoint: json_column(row, 6)?,
        final_output: optional_json_column(row, 7)?,
        error: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

const CONVERSATION_COLUMNS: &str = "conversation_id, status, summary, preferences_json, active_run_id, error,
     created_at, updated_at";

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let status: String = row.get(1)?;
    Ok(Conversation {
        conversation_id: row.get(0)?,
        status: ConversationStatus::from_status(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                Type::Text,
                format!("unknown conversation status '{}'", status).into(),
            )
        })?,
        summary: row.get(2)?,
        preferences: json_column(row, 3)?,
        active_run_id: row.get(4)?,
        error: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

const TURN_COLUMNS: &str = "message_id, conversation_id, run_id, user_input, clarifications_json, subqueries_json,
     retrieval_json, agent_answer, agent_reasoning, agent_tool_calls_json, created_at, updated_at";

fn turn_from_row(row: &Row<'_>) -> rusqlite::Result<Turn> {
    Ok(Turn {
        message_id: row.get(0)?,
        conversation_id: row.get(1)?,
        run_id: row.get(2)?,
        user_input: row.get(3)?,
        clarifications: json_column(row, 4)?,
        subqueries: json_column(row, 5)?,
        retrieval: json_column(row, 6)?,
        agent_answer: row.get(7)?,
        agent_reasoning: row.get(8)?,
        agent_tool_calls: optional_json_column(row, 9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

const EVENT_COLUMNS: &str =
    "cursor, conversation_id, run_id, message_id, payload_json, is_final, is_error, ends_stream, created_at";

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<StoredEvent> {
    Ok(StoredEvent {
        cursor: row.get(0)?,
        conversation_id: row.get(1)?,
        run_id: row.get(2)?,
        message_id: row.get(3)?,
        payload: json_column(row, 4)?,
        is_final: row.get(5)?,
        is_error: row.get(6)?,
        ends_stream: row.get(7)?,
        created_at: row.get(8)?,
    })
}

// --- Statement helpers usable inside or outside a transaction ---

fn load_run(conn: &Connection, run_id: &str) -> WorkflowResult<Option<Run>> {
    let sql = format!("SELECT {} FROM workflow_runs WHERE run_id = ?1", RUN_COLUMNS);
    Ok(conn
        .query_row(&sql, params![run_id], run_from_row)
        .optional()?)
}

fn require_run(conn: &Connection, run_id: &str) -> WorkflowResult<Run> {
    load_run(conn, run_id)?.ok_or_else(|| WorkflowError::not_found("run", run_id))
}

fn save_run(conn: &Connection, run: &Run) -> WorkflowResult<()> {
    let checkpoint = serde_json::to_string(&run.checkpoint)?;
    let final_output = run
        .final_output
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "UPDATE workflow_runs
         SET status = ?2, checkpoint_json = ?3, final_output_json = ?4, error = ?5, updated_at = ?6
         WHERE run_id = ?1",
        params![
            run.run_id,
            run.status.as_str(),
            checkpoint,
            final_output,
            run.error,
            run.updated_at
        ],
    )?;
    Ok(())
}

fn load_conversation(conn: &Connection, conversation_id: &str) -> WorkflowResult<Option<Conversation>> {
    let sql = format!(
        "SELECT {} FROM conversations WHERE conversation_id = ?1",
        CONVERSATION_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![conversation_id], conversation_from_row)
        .optional()?)
}

fn require_conversation(conn: &Connection, conversation_id: &str) -> WorkflowResult<Conversation> {
    load_conversation(conn, conversation_id)?
        .ok_or_else(|| WorkflowError::not_found("conversation", conversation_id))
}

/// Clears the active-run pointer, but only if it still names `run_id`.
fn release_pointer(conn: &Connection, conversation_id: &str, run_id: &str) -> WorkflowResult<()> {
    conn.execute(
        "UPDATE conversations SET active_run_id = NULL, updated_at = ?3
         WHERE conversation_id = ?1 AND active_run_id = ?2",
        params![conversation_id, run_id, timestamp()],
    )?;
    Ok(())
}

fn insert_event(
    conn: &Connection,
    conversation_id: &str,
    run: Option<&Run>,
    payload: EventPayload,
) -> WorkflowResult<StoredEvent> {
    let created_at = timestamp();
    let run_id = run.map(|r| r.run_id.clone());
    let message_id = run.map(|r| r.message_id.clone());
    let payload_json = serde_json::to_string(&payload)?;
    conn.execute(
        "INSERT INTO workflow_events
            (conversation_id, run_id, message_id, kind, message, payload_json,
             is_final, is_error, ends_stream, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            conversation_id,
            run_id,
            message_id,
            payload.kind(),
            payload.message(),
            payload_json,
            payload.is_final(),
            payload.is_error(),
            payload.ends_stream(),
            created_at
        ],
    )?;
    let cursor = conn.last_insert_rowid();
    Ok(StoredEvent {
        cursor,
        conversation_id: conversation_id.to_string(),
        run_id,
        message_id,
        is_final: payload.is_final(),
        is_error: payload.is_error(),
        ends_stream: payload.ends_stream(),
        payload,
        created_at,
    })
}

fn latest_cursor(conn: &Connection, conversation_id: &str) -> WorkflowResult<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(cursor), 0) FROM workflow_events WHERE conversation_id = ?1",
        params![conversation_id],
        |row| row.get(0),
    )?)
}
