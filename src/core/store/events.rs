use rusqlite::{OptionalExtension, params};

use super::types::StoredEvent;
use super::{
    EVENT_COLUMNS, WorkflowStore, event_from_row, insert_event, latest_cursor, load_run,
    require_conversation,
};
use crate::core::error::{WorkflowError, WorkflowResult};
use crate::core::workflow::EventPayload;

impl WorkflowStore {
    /// Appends to the conversation's log and returns the assigned cursor.
    pub async fn append_event(
        &self,
        conversation_id: &str,
        run_id: Option<&str>,
        payload: EventPayload,
    ) -> WorkflowResult<StoredEvent> {
        let db = self.db.lock().await;
        require_conversation(&db, conversation_id)?;
        let run = match run_id {
            Some(id) => Some(
                load_run(&db, id)?
                    .filter(|r| r.conversation_id == conversation_id)
                    .ok_or_else(|| WorkflowError::not_found("run", id))?,
            ),
            None => None,
        };
        let event = insert_event(&db, conversation_id, run.as_ref(), payload)?;
        drop(db);

        self.publish(&[&event]);
        Ok(event)
    }

    /// Events with cursor strictly greater than `after`, ascending.
    pub async fn list_events_after(
        &self,
        conversation_id: &str,
        after: i64,
        limit: i64,
        message_id: Option<&str>,
    ) -> WorkflowResult<Vec<StoredEvent>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM workflow_events
             WHERE conversation_id = ?1 AND cursor > ?2 AND (?3 IS NULL OR message_id = ?3)
             ORDER BY cursor ASC
             LIMIT ?4",
            EVENT_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(
            params![conversation_id, after, message_id, limit.max(1)],
            event_from_row,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Latest final-result event of the conversation. Served from the
    /// partial index on `is_final`, so cost does not grow with log volume.
    pub async fn read_final(&self, conversation_id: &str) -> WorkflowResult<Option<StoredEvent>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM workflow_events INDEXED BY idx_events_final
             WHERE conversation_id = ?1 AND is_final = 1
             ORDER BY cursor DESC
             LIMIT 1",
            EVENT_COLUMNS
        );
        Ok(db
            .query_row(&sql, params![conversation_id], event_from_row)
            .optional()?)
    }

    /// First stream-ending event (result, error or terminal status) after
    /// `after`, optionally scoped to one message.
    pub async fn first_stream_end_after(
        &self,
        conversation_id: &str,
        after: i64,
        message_id: Option<&str>,
    ) -> WorkflowResult<Option<StoredEvent>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM workflow_events INDEXED BY idx_events_stream_end
             WHERE conversation_id = ?1 AND ends_stream = 1 AND cursor > ?2
               AND (?3 IS NULL OR message_id = ?3)
             ORDER BY cursor ASC
             LIMIT 1",
            EVENT_COLUMNS
        );
        Ok(db
            .query_row(&sql, params![conversation_id, after, message_id], event_from_row)
            .optional()?)
    }

    /// Message id of the run a subscriber without a position follows: the
    /// active run, else the run behind the latest stream-ending event.
    pub async fn current_message_id(&self, conversation_id: &str) -> WorkflowResult<Option<String>> {
        let db = self.db.lock().await;
        let active: Option<String> = db
            .query_row(
                "SELECT r.message_id FROM conversations c
                 JOIN workflow_runs r ON r.run_id = c.active_run_id
                 WHERE c.conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )
            .optional()?;
        if active.is_some() {
            return Ok(active);
        }
        Ok(db
            .query_row(
                "SELECT message_id FROM workflow_events INDEXED BY idx_events_stream_end
                 WHERE conversation_id = ?1 AND ends_stream = 1 AND message_id IS NOT NULL
                 ORDER BY cursor DESC
                 LIMIT 1",
                params![conversation_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub async fn latest_cursor(&self, conversation_id: &str) -> WorkflowResult<i64> {
        let db = self.db.lock().await;
        latest_cursor(&db, conversation_id)
    }
}
