use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::types::{Admission, Conversation, RequestIntake, RequestStart, StoredEvent, Turn};
use super::{
    RUN_COLUMNS, WorkflowStore, insert_event, latest_cursor, load_conversation, release_pointer,
    require_conversation, require_run, run_from_row, run_status_column, save_run,
};
use crate::core::error::{WorkflowError, WorkflowResult};
use crate::core::workflow::{
    ActiveRun, CheckpointUpdate, ConversationSnapshot, EventPayload, RetrievalOutput, Run,
    RunStatus, Scenario, classify, timestamp,
};

fn snapshot_of(conn: &Connection, conversation: &Conversation) -> WorkflowResult<ConversationSnapshot> {
    let active_run = match &conversation.active_run_id {
        Some(run_id) => {
            let status = conn
                .query_row(
                    "SELECT status FROM workflow_runs WHERE run_id = ?1",
                    params![run_id],
                    |row| run_status_column(row, 0),
                )
                .optional()?;
            Some(ActiveRun {
                run_id: run_id.clone(),
                status,
            })
        }
        None => None,
    };
    Ok(ConversationSnapshot {
        conversation_id: conversation.conversation_id.clone(),
        active_run,
    })
}

fn insert_run(conn: &Connection, run: &Run) -> WorkflowResult<()> {
    let checkpoint = serde_json::to_string(&run.checkpoint)?;
    let result = conn.execute(
        "INSERT INTO workflow_runs
            (run_id, conversation_id, message_id, status, user_input, allow_clarification,
             checkpoint_json, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            run.run_id,
            run.conversation_id,
            run.message_id,
            run.status.as_str(),
            run.user_input,
            run.allow_clarification,
            checkpoint,
            run.created_at,
            run.updated_at
        ],
    );
    match result {
        Ok(_) => Ok(()),
        // The partial unique index on active runs caught a second active run.
        Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
            Err(WorkflowError::busy(
                &run.conversation_id,
                "another run is already active",
            ))
        }
        Err(e) => Err(e.into()),
    }
}

fn require_running(run: &Run) -> WorkflowResult<()> {
    if run.status != RunStatus::Running {
        return Err(WorkflowError::InvalidState(format!(
            "run '{}' is {}, not running",
            run.run_id, run.status
        )));
    }
    Ok(())
}

impl WorkflowStore {
    /// Classifies the request and creates or resumes its run in one
    /// IMMEDIATE transaction, so concurrent requests against the same
    /// conversation serialize on the active-run pointer.
    pub async fn begin_request(&self, intake: RequestIntake) -> WorkflowResult<RequestStart> {
        let mut db = self.db.lock().await;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = match intake.conversation_id.as_deref() {
            Some(id) => load_conversation(&tx, id)?,
            None => None,
        };
        let snapshot = existing
            .as_ref()
            .map(|conv| snapshot_of(&tx, conv))
            .transpose()?;
        let scenario = classify(intake.conversation_id.as_deref(), snapshot.as_ref());
        let now = timestamp();

        let (admission, run) = match scenario {
            Scenario::NotFound { conversation_id } => {
                return Err(WorkflowError::not_found("conversation", conversation_id));
            }
            Scenario::Busy { run_id } => {
                return Err(WorkflowError::busy(
                    intake.conversation_id.clone().unwrap_or_default(),
                    format!("run '{}' is still running", run_id),
                ));
            }
            Scenario::NewConversation => {
                let conversation_id = Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO conversations (conversation_id, status, preferences_json, created_at, updated_at)
                     VALUES (?1, 'active', '{}', ?2, ?2)",
                    params![conversation_id, now],
                )?;
                let run = Run::start(
                    &conversation_id,
                    &intake.user_input,
                    intake.allow_clarification,
                );
                insert_run(&tx, &run)?;
                (Admission::NewConversation, run)
            }
            Scenario::NewTurn { stale_pointer } => {
                let conversation_id = intake.conversation_id.clone().unwrap_or_default();
                if let Some(stale) = stale_pointer {
                    warn!(
                        conversation_id = %conversation_id,
                        run_id = %stale,
                        "Repairing active-run pointer left on a finished run"
                    );
                }
                let run = Run::start(
                    &conversation_id,
                    &intake.user_input,
                    intake.allow_clarification,
                );
                insert_run(&tx, &run)?;
                (Admission::NewTurn, run)
            }
            Scenario::ClarificationAnswer { run_id } => {
                let mut run = require_run(&tx, &run_id)?;
                let pair = run.submit_clarification(&intake.user_input)?;
                save_run(&tx, &run)?;
                (Admission::ClarificationAnswer(pair), run)
            }
        };

        let mut preferences = existing.map(|c| c.preferences).unwrap_or_default();
        if let Some(update) = intake.preferences {
            preferences.extend(update);
        }
        tx.execute(
            "UPDATE conversations
             SET active_run_id = ?2, preferences_json = ?3, updated_at = ?4
             WHERE conversation_id = ?1",
            params![
                run.conversation_id,
                run.run_id,
                serde_json::to_string(&preferences)?,
                now
            ],
        )?;

        let stream_cursor = latest_cursor(&tx, &run.conversation_id)?;
        let conversation = require_conversation(&tx, &run.conversation_id)?;
        tx.commit()?;

        info!(
            conversation_id = %run.conversation_id,
            run_id = %run.run_id,
            message_id = %run.message_id,
            admission = ?admission,
            "Admitted workflow request"
        );
        Ok(RequestStart {
            admission,
            conversation,
            run,
            stream_cursor,
        })
    }

    pub async fn get_run(&self, run_id: &str) -> WorkflowResult<Option<Run>> {
        let db = self.db.lock().await;
        super::load_run(&db, run_id)
    }

    pub async fn get_run_by_message(&self, message_id: &str) -> WorkflowResult<Option<Run>> {
        let db = self.db.lock().await;
        let sql = format!("SELECT {} FROM workflow_runs WHERE message_id = ?1", RUN_COLUMNS);
        Ok(db
            .query_row(&sql, params![message_id], run_from_row)
            .optional()?)
    }

    pub async fn list_runs(&self, conversation_id: &str) -> WorkflowResult<Vec<Run>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM workflow_runs WHERE conversation_id = ?1 ORDER BY created_at ASC, rowid ASC",
            RUN_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params![conversation_id], run_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Merges a checkpoint update and optionally emits a progress event.
    /// Fails with InvalidState once the run has left `running`.
    pub async fn checkpoint_run(
        &self,
        run_id: &str,
        update: CheckpointUpdate,
        progress: Option<EventPayload>,
    ) -> WorkflowResult<Run> {
        let mut db = self.db.lock().await;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut run = require_run(&tx, run_id)?;
        run.apply_checkpoint(update)?;
        save_run(&tx, &run)?;
        let event = progress
            .map(|payload| insert_event(&tx, &run.conversation_id, Some(&run), payload))
            .transpose()?;
        tx.commit()?;
        drop(db);

        if let Some(event) = &event {
            self.publish(&[event]);
        }
        Ok(run)
    }

    /// Appends a progress event on behalf of a run that is still `running`.
    pub async fn emit_progress(
        &self,
        run_id: &str,
        payload: EventPayload,
    ) -> WorkflowResult<StoredEvent> {
        let mut db = self.db.lock().await;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let run = require_run(&tx, run_id)?;
        require_running(&run)?;
        let event = insert_event(&tx, &run.conversation_id, Some(&run), payload)?;
        tx.commit()?;
        drop(db);

        self.publish(&[&event]);
        Ok(event)
    }

    pub async fn pause_run(&self, run_id: &str, question: &str) -> WorkflowResult<Run> {
        let mut db = self.db.lock().await;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut run = require_run(&tx, run_id)?;
        run.pause(question)?;
        save_run(&tx, &run)?;
        let event = insert_event(
            &tx,
            &run.conversation_id,
            Some(&run),
            EventPayload::progress_with(
                "Clarification requested",
                json!({ "clarification_question": question }),
            ),
        )?;
        tx.commit()?;
        drop(db);

        self.publish(&[&event]);
        info!(run_id = %run_id, "Run paused for clarification");
        Ok(run)
    }

    /// Completes the run, records its turn, emits the final result and
    /// releases the active-run pointer as one unit of work.
    pub async fn complete_run(
        &self,
        run_id: &str,
        output: RetrievalOutput,
    ) -> WorkflowResult<(Run, Turn)> {
        let mut db = self.db.lock().await;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut run = require_run(&tx, run_id)?;
        run.complete(output.clone())?;
        save_run(&tx, &run)?;

        let now = timestamp();
        let turn = Turn {
            message_id: run.message_id.clone(),
            conversation_id: run.conversation_id.clone(),
            run_id: run.run_id.clone(),
            user_input: run.user_input.clone(),
            clarifications: run.checkpoint.clarifications.clone(),
            subqueries: run.checkpoint.subqueries.clone(),
            retrieval: output.clone(),
            agent_answer: None,
            agent_reasoning: None,
            agent_tool_calls: None,
            created_at: now.clone(),
            updated_at: now,
        };
        tx.execute(
            "INSERT INTO conversation_turns
                (message_id, conversation_id, run_id, user_input, clarifications_json,
                 subqueries_json, retrieval_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                turn.message_id,
                turn.conversation_id,
                turn.run_id,
                turn.user_input,
                serde_json::to_string(&turn.clarifications)?,
                serde_json::to_string(&turn.subqueries)?,
                serde_json::to_string(&turn.retrieval)?,
                turn.created_at,
                turn.updated_at
            ],
        )?;

        let event = insert_event(
            &tx,
            &run.conversation_id,
            Some(&run),
            EventPayload::Result(output),
        )?;
        release_pointer(&tx, &run.conversation_id, &run.run_id)?;
        tx.commit()?;
        drop(db);

        self.publish(&[&event]);
        info!(run_id = %run_id, cursor = event.cursor, "Run completed");
        Ok((run, turn))
    }

    pub async fn fail_run(&self, run_id: &str, detail: &str, code: &str) -> WorkflowResult<Run> {
        let mut db = self.db.lock().await;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut run = require_run(&tx, run_id)?;
        run.fail(detail)?;
        save_run(&tx, &run)?;
        let event = insert_event(
            &tx,
            &run.conversation_id,
            Some(&run),
            EventPayload::Error {
                message: detail.to_string(),
                code: code.to_string(),
            },
        )?;
        release_pointer(&tx, &run.conversation_id, &run.run_id)?;
        tx.execute(
            "UPDATE conversations SET error = ?2 WHERE conversation_id = ?1",
            params![run.conversation_id, detail],
        )?;
        tx.commit()?;
        drop(db);

        self.publish(&[&event]);
        warn!(run_id = %run_id, code = code, "Run failed: {}", detail);
        Ok(run)
    }

    /// Cancels whichever run the conversation currently points at.
    pub async fn cancel_active(&self, conversation_id: &str) -> WorkflowResult<Run> {
        let mut db = self.db.lock().await;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let conversation = require_conversation(&tx, conversation_id)?;
        let Some(run_id) = conversation.active_run_id else {
            return Err(WorkflowError::InvalidState(format!(
                "conversation '{}' has no active run to cancel",
                conversation_id
            )));
        };
        let mut run = require_run(&tx, &run_id)?;
        run.cancel()?;
        save_run(&tx, &run)?;
        let event = insert_event(
            &tx,
            conversation_id,
            Some(&run),
            EventPayload::Status {
                status: RunStatus::Cancelled,
                message: "Workflow cancelled".to_string(),
            },
        )?;
        release_pointer(&tx, conversation_id, &run.run_id)?;
        tx.commit()?;
        drop(db);

        self.publish(&[&event]);
        info!(conversation_id = %conversation_id, run_id = %run.run_id, "Run cancelled");
        Ok(run)
    }

    /// Fails every run left `running` by a previous process. Paused runs
    /// are durable and stay resumable.
    pub async fn fail_interrupted_runs(&self) -> WorkflowResult<usize> {
        let run_ids: Vec<String> = {
            let db = self.db.lock().await;
            let mut stmt = db.prepare("SELECT run_id FROM workflow_runs WHERE status = 'running'")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<Result<Vec<String>, rusqlite::Error>>()?
        };
        for run_id in &run_ids {
            self.fail_run(run_id, "interrupted by server restart", "INTERRUPTED")
                .await?;
        }
        if !run_ids.is_empty() {
            warn!(count = run_ids.len(), "Failed runs interrupted by restart");
        }
        Ok(run_ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::test_store;
    use crate::core::workflow::Clarification;

    fn intake(conversation_id: Option<&str>, input: &str) -> RequestIntake {
        RequestIntake {
            conversation_id: conversation_id.map(str::to_string),
            user_input: input.to_string(),
            allow_clarification: true,
            preferences: None,
        }
    }

    fn hits(tag: &str) -> RetrievalOutput {
        RetrievalOutput {
            memories: vec![json!({ "text": tag })],
            reasoning_hits: vec![],
        }
    }

    async fn active_run_count(store: &WorkflowStore, conversation_id: &str) -> usize {
        store
            .list_runs(conversation_id)
            .await
            .unwrap()
            .iter()
            .filter(|r| r.is_active())
            .count()
    }

    // --- Admission ---

    #[tokio::test]
    async fn new_conversation_creates_conversation_and_run() {
        let store = test_store();
        let start = store
            .begin_request(intake(None, "best product?"))
            .await
            .unwrap();
        assert_eq!(start.admission, Admission::NewConversation);
        assert_eq!(start.run.status, RunStatus::Running);
        assert_eq!(
            start.conversation.active_run_id.as_deref(),
            Some(start.run.run_id.as_str())
        );
        assert_eq!(start.stream_cursor, 0);
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let store = test_store();
        let err = store
            .begin_request(intake(Some("nope"), "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound { .. }));
    }

    #[tokio::test]
    async fn running_conversation_rejects_new_request() {
        let store = test_store();
        let start = store.begin_request(intake(None, "first")).await.unwrap();
        let conv = start.conversation.conversation_id.clone();

        let err = store
            .begin_request(intake(Some(&conv), "second"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Conflict { .. }));

        let run = store.get_run(&start.run.run_id).await.unwrap().unwrap();
        assert_eq!(run, start.run);
        assert_eq!(active_run_count(&store, &conv).await, 1);
    }

    #[tokio::test]
    async fn clarification_answer_resumes_waiting_run() {
        let store = test_store();
        let start = store
            .begin_request(intake(None, "best product?"))
            .await
            .unwrap();
        let conv = start.conversation.conversation_id.clone();
        store
            .pause_run(&start.run.run_id, "which region?")
            .await
            .unwrap();

        let resumed = store
            .begin_request(intake(Some(&conv), "East coast"))
            .await
            .unwrap();
        assert_eq!(
            resumed.admission,
            Admission::ClarificationAnswer(Clarification {
                question: "which region?".into(),
                answer: "East coast".into(),
            })
        );
        assert_eq!(resumed.run.run_id, start.run.run_id);
        assert_eq!(resumed.run.status, RunStatus::Running);
        assert!(resumed.run.checkpoint.pending_question.is_none());
        assert!(resumed.stream_cursor > 0);
    }

    #[tokio::test]
    async fn new_turn_after_completion_creates_second_run() {
        let store = test_store();
        let first = store.begin_request(intake(None, "first")).await.unwrap();
        let conv = first.conversation.conversation_id.clone();
        store
            .complete_run(&first.run.run_id, hits("a"))
            .await
            .unwrap();

        let second = store
            .begin_request(intake(Some(&conv), "second"))
            .await
            .unwrap();
        assert_eq!(second.admission, Admission::NewTurn);
        assert_ne!(second.run.run_id, first.run.run_id);
        assert_ne!(second.run.message_id, first.run.message_id);
        assert_eq!(active_run_count(&store, &conv).await, 1);
    }

    #[tokio::test]
    async fn preferences_are_merged_key_wise() {
        let store = test_store();
        let mut first = intake(None, "first");
        first.preferences = Some(
            json!({"tone": "brief", "lang": "en"})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let start = store.begin_request(first).await.unwrap();
        let conv = start.conversation.conversation_id.clone();
        store
            .complete_run(&start.run.run_id, hits("a"))
            .await
            .unwrap();

        let mut second = intake(Some(&conv), "second");
        second.preferences = Some(json!({"lang": "pt"}).as_object().cloned().unwrap());
        let next = store.begin_request(second).await.unwrap();
        assert_eq!(next.conversation.preferences["tone"], "brief");
        assert_eq!(next.conversation.preferences["lang"], "pt");
    }

    #[tokio::test]
    async fn concurrent_requests_admit_exactly_one_run() {
        let store = test_store();
        let first = store.begin_request(intake(None, "first")).await.unwrap();
        let conv = first.conversation.conversation_id.clone();
        store
            .complete_run(&first.run.run_id, hits("a"))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let conv = conv.clone();
            handles.push(tokio::spawn(async move {
                store
                    .begin_request(intake(Some(&conv), &format!("turn {}", i)))
                    .await
            }));
        }
        let mut admitted = 0;
        let mut busy = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(WorkflowError::Conflict { .. }) => busy += 1,
                Err(e) => panic!("unexpected error {:?}", e),
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(busy, 7);
        assert_eq!(active_run_count(&store, &conv).await, 1);
    }

    // --- Outcomes ---

    #[tokio::test]
    async fn complete_records_turn_and_clears_pointer() {
        let store = test_store();
        let start = store.begin_request(intake(None, "hello")).await.unwrap();
        let conv = start.conversation.conversation_id.clone();
        store
            .checkpoint_run(
                &start.run.run_id,
                CheckpointUpdate::Subqueries(vec!["hello".into()]),
                None,
            )
            .await
            .unwrap();

        let (run, turn) = store
            .complete_run(&start.run.run_id, hits("a"))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.final_output, Some(hits("a")));
        assert_eq!(turn.message_id, run.message_id);
        assert_eq!(turn.subqueries, vec!["hello"]);
        assert!(turn.agent_answer.is_none());

        let conversation = store.get_conversation(&conv).await.unwrap().unwrap();
        assert!(conversation.active_run_id.is_none());
        let final_event = store.read_final(&conv).await.unwrap().unwrap();
        assert_eq!(final_event.payload, EventPayload::Result(hits("a")));
    }

    #[tokio::test]
    async fn second_completion_is_invalid_state() {
        let store = test_store();
        let start = store.begin_request(intake(None, "hello")).await.unwrap();
        store
            .complete_run(&start.run.run_id, hits("a"))
            .await
            .unwrap();
        let err = store
            .complete_run(&start.run.run_id, hits("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidState(_)));
        let turns = store
            .list_turns(&start.conversation.conversation_id, 10)
            .await
            .unwrap();
        assert_eq!(turns.len(), 1);
    }

    #[tokio::test]
    async fn fail_records_error_event_and_conversation_error() {
        let store = test_store();
        let start = store.begin_request(intake(None, "hello")).await.unwrap();
        let conv = start.conversation.conversation_id.clone();
        let run = store
            .fail_run(&start.run.run_id, "retriever timed out", "COLLABORATOR_FAILURE")
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Failed);

        let conversation = store.get_conversation(&conv).await.unwrap().unwrap();
        assert!(conversation.active_run_id.is_none());
        assert_eq!(conversation.error.as_deref(), Some("retriever timed out"));

        let events = store.list_events_after(&conv, 0, 10, None).await.unwrap();
        let last = events.last().unwrap();
        assert!(last.is_error);
        assert!(!last.is_final);
        assert!(last.ends_stream);
    }

    #[tokio::test]
    async fn cancel_blocks_later_checkpoints_and_events() {
        let store = test_store();
        let start = store.begin_request(intake(None, "hello")).await.unwrap();
        let conv = start.conversation.conversation_id.clone();
        let cancelled = store.cancel_active(&conv).await.unwrap();
        assert_eq!(cancelled.status, RunStatus::Cancelled);

        let err = store
            .checkpoint_run(
                &start.run.run_id,
                CheckpointUpdate::Subqueries(vec!["x".into()]),
                Some(EventPayload::progress("late")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidState(_)));
        let err = store
            .emit_progress(&start.run.run_id, EventPayload::progress("late"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidState(_)));

        let events = store.list_events_after(&conv, 0, 10, None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload.kind(), "status");
    }

    #[tokio::test]
    async fn cancel_waiting_run_allows_new_turn() {
        let store = test_store();
        let start = store.begin_request(intake(None, "hello")).await.unwrap();
        let conv = start.conversation.conversation_id.clone();
        store.pause_run(&start.run.run_id, "which?").await.unwrap();
        store.cancel_active(&conv).await.unwrap();

        let next = store
            .begin_request(intake(Some(&conv), "never mind, new question"))
            .await
            .unwrap();
        assert_eq!(next.admission, Admission::NewTurn);
    }

    #[tokio::test]
    async fn cancel_without_active_run_is_invalid_state() {
        let store = test_store();
        let start = store.begin_request(intake(None, "hello")).await.unwrap();
        let conv = start.conversation.conversation_id.clone();
        store
            .complete_run(&start.run.run_id, hits("a"))
            .await
            .unwrap();
        let err = store.cancel_active(&conv).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidState(_)));
    }

    #[tokio::test]
    async fn stale_pointer_is_repaired_on_next_request() {
        let store = test_store();
        let start = store.begin_request(intake(None, "hello")).await.unwrap();
        let conv = start.conversation.conversation_id.clone();
        {
            // Simulate a pointer left behind by an external writer.
            let db = store.db.lock().await;
            db.execute(
                "UPDATE workflow_runs SET status = 'completed' WHERE run_id = ?1",
                params![start.run.run_id],
            )
            .unwrap();
        }
        let next = store
            .begin_request(intake(Some(&conv), "again"))
            .await
            .unwrap();
        assert_eq!(next.admission, Admission::NewTurn);
        assert_eq!(
            next.conversation.active_run_id.as_deref(),
            Some(next.run.run_id.as_str())
        );
    }

    #[tokio::test]
    async fn interrupted_runs_fail_but_paused_runs_survive() {
        let store = test_store();
        let running = store.begin_request(intake(None, "left running")).await.unwrap();
        let paused = store.begin_request(intake(None, "left paused")).await.unwrap();
        store
            .pause_run(&paused.run.run_id, "which region?")
            .await
            .unwrap();

        assert_eq!(store.fail_interrupted_runs().await.unwrap(), 1);
        let failed = store.get_run(&running.run.run_id).await.unwrap().unwrap();
        assert_eq!(failed.status, RunStatus::Failed);
        let conv = store
            .get_conversation(&running.conversation.conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert!(conv.active_run_id.is_none());

        let still = store.get_run(&paused.run.run_id).await.unwrap().unwrap();
        assert_eq!(still.status, RunStatus::WaitingForInput);
        assert_eq!(store.fail_interrupted_runs().await.unwrap(), 0);
    }
}
