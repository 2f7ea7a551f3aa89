use rusqlite::{OptionalExtension, TransactionBehavior, params};
use tracing::info;

use super::types::{AgentAnswer, Conversation, Turn};
use super::{
    TURN_COLUMNS, WorkflowStore, load_conversation, require_conversation, turn_from_row,
};
use crate::core::error::{WorkflowError, WorkflowResult};
use crate::core::workflow::timestamp;

impl WorkflowStore {
    pub async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> WorkflowResult<Option<Conversation>> {
        let db = self.db.lock().await;
        load_conversation(&db, conversation_id)
    }

    /// Most recent `limit` turns, oldest first.
    pub async fn list_turns(&self, conversation_id: &str, limit: usize) -> WorkflowResult<Vec<Turn>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM (
                SELECT *, rowid AS seq FROM conversation_turns
                WHERE conversation_id = ?1
                ORDER BY created_at DESC, seq DESC
                LIMIT ?2
             ) ORDER BY created_at ASC, seq ASC",
            TURN_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params![conversation_id, limit as i64], turn_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn get_turn(&self, message_id: &str) -> WorkflowResult<Option<Turn>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM conversation_turns WHERE message_id = ?1",
            TURN_COLUMNS
        );
        Ok(db
            .query_row(&sql, params![message_id], turn_from_row)
            .optional()?)
    }

    /// Attaches the agent's answer to a completed turn. The turn accepts
    /// exactly one answer; run state is not touched.
    pub async fn record_answer(
        &self,
        conversation_id: &str,
        message_id: &str,
        answer: AgentAnswer,
    ) -> WorkflowResult<Turn> {
        let mut db = self.db.lock().await;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let sql = format!(
            "SELECT {} FROM conversation_turns WHERE message_id = ?1",
            TURN_COLUMNS
        );
        let mut turn = tx
            .query_row(&sql, params![message_id], turn_from_row)
            .optional()?
            .filter(|t| t.conversation_id == conversation_id)
            .ok_or_else(|| WorkflowError::not_found("turn", message_id))?;
        if turn.agent_answer.is_some() {
            return Err(WorkflowError::InvalidState(format!(
                "turn '{}' already has an answer",
                message_id
            )));
        }

        turn.agent_answer = Some(answer.response);
        turn.agent_reasoning = answer.reasoning;
        turn.agent_tool_calls = answer.tool_calls;
        turn.updated_at = timestamp();
        let tool_calls = turn
            .agent_tool_calls
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        tx.execute(
            "UPDATE conversation_turns
             SET agent_answer = ?2, agent_reasoning = ?3, agent_tool_calls_json = ?4, updated_at = ?5
             WHERE message_id = ?1",
            params![
                message_id,
                turn.agent_answer,
                turn.agent_reasoning,
                tool_calls,
                turn.updated_at
            ],
        )?;
        tx.commit()?;
        info!(message_id = %message_id, "Recorded agent answer");
        Ok(turn)
    }

    pub async fn update_summary(
        &self,
        conversation_id: &str,
        summary: Option<&str>,
    ) -> WorkflowResult<Conversation> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE conversations SET summary = ?2, updated_at = ?3 WHERE conversation_id = ?1",
            params![conversation_id, summary, timestamp()],
        )?;
        if changed == 0 {
            return Err(WorkflowError::not_found("conversation", conversation_id));
        }
        require_conversation(&db, conversation_id)
    }

    /// Administrative removal of a conversation with its runs, turns and
    /// events. Refused while a run is actively processing.
    pub async fn delete_conversation(&self, conversation_id: &str) -> WorkflowResult<()> {
        let mut db = self.db.lock().await;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        require_conversation(&tx, conversation_id)?;
        let running: Option<String> = tx
            .query_row(
                "SELECT run_id FROM workflow_runs WHERE conversation_id = ?1 AND status = 'running'",
                params![conversation_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(run_id) = running {
            return Err(WorkflowError::busy(
                conversation_id,
                format!("run '{}' is still running", run_id),
            ));
        }
        tx.execute(
            "DELETE FROM conversations WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        tx.commit()?;
        info!(conversation_id = %conversation_id, "Deleted conversation");
        Ok(())
    }
}
