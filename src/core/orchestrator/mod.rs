//! Drives one request through the retrieval pipeline.
//!
//! `execute` admits the request, runs subquery generation inline so the
//! caller learns right away whether a clarification is needed, and hands
//! retrieval to a background task. Every stage writes through the store, so
//! a conversation cancelled mid-flight turns later writes into
//! `InvalidState` and the background task abandons the run.

mod fanout;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::collaborators::{
    HistoryTurn, MemoryRetriever, PromptContext, SubqueryGenerator, SubqueryOutcome,
};
use crate::core::config::PipelineConfig;
use crate::core::error::{WorkflowError, WorkflowResult};
use crate::core::store::{Admission, AgentAnswer, RequestIntake, RequestStart, Turn, WorkflowStore};
use crate::core::workflow::{CheckpointUpdate, EventPayload, Run, RunStatus};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default, alias = "workflow_id")]
    pub conversation_id: Option<String>,
    pub user_input: String,
    #[serde(default = "default_true", alias = "ask_clarifications")]
    pub allow_clarification: bool,
    #[serde(default)]
    pub preferences: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteResponse {
    pub conversation_id: String,
    pub message_id: String,
    /// `running`, `waiting_for_input` or `failed` as settled by the inline
    /// stage. `cancelled` appears when a cancel lands while subquery
    /// generation is still in flight.
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarification_question: Option<String>,
    /// Subscribe with this cursor to see only this request's events.
    pub cursor: i64,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnswerRequest {
    #[serde(alias = "workflow_id")]
    pub conversation_id: String,
    pub message_id: String,
    pub response: String,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Value>,
}

pub struct Execution {
    pub response: ExecuteResponse,
    /// Retrieval task, present when the run went past subquery generation.
    pub background: Option<JoinHandle<()>>,
}

enum StageOutcome {
    Paused(String),
    Subqueries(Vec<String>),
}

#[derive(Clone)]
pub struct Orchestrator {
    store: WorkflowStore,
    subqueries: Arc<dyn SubqueryGenerator>,
    retriever: Arc<dyn MemoryRetriever>,
    settings: PipelineConfig,
}

impl Orchestrator {
    pub fn new(
        store: WorkflowStore,
        subqueries: Arc<dyn SubqueryGenerator>,
        retriever: Arc<dyn MemoryRetriever>,
        settings: PipelineConfig,
    ) -> Self {
        Self {
            store,
            subqueries,
            retriever,
            settings,
        }
    }

    pub fn store(&self) -> &WorkflowStore {
        &self.store
    }

    pub async fn execute(&self, request: ExecuteRequest) -> WorkflowResult<Execution> {
        let user_input = request.user_input.trim().to_string();
        if user_input.is_empty() {
            return Err(WorkflowError::Validation(
                "user_input must not be empty".to_string(),
            ));
        }
        let conversation_id = request
            .conversation_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        let start = self
            .store
            .begin_request(RequestIntake {
                conversation_id,
                user_input,
                allow_clarification: request.allow_clarification,
                preferences: request.preferences,
            })
            .await?;

        let message = match &start.admission {
            Admission::NewConversation => "Workflow started",
            Admission::NewTurn => "Workflow continued",
            Admission::ClarificationAnswer(_) => "Clarification received",
        };
        let mut response = ExecuteResponse {
            conversation_id: start.conversation.conversation_id.clone(),
            message_id: start.run.message_id.clone(),
            status: RunStatus::Running,
            clarification_question: None,
            cursor: start.stream_cursor,
            message: message.to_string(),
        };

        match self.generate_stage(&start).await {
            Ok(StageOutcome::Paused(question)) => {
                response.status = RunStatus::WaitingForInput;
                response.clarification_question = Some(question);
                Ok(Execution {
                    response,
                    background: None,
                })
            }
            Ok(StageOutcome::Subqueries(subqueries)) => {
                let this = self.clone();
                let run_id = start.run.run_id.clone();
                let background = tokio::spawn(async move {
                    if let Err(err) = this.retrieval_stage(&run_id, &subqueries).await {
                        this.settle_failure(&run_id, err).await;
                    }
                });
                Ok(Execution {
                    response,
                    background: Some(background),
                })
            }
            Err(err) => {
                response.status = self.settle_failure(&start.run.run_id, err).await;
                Ok(Execution {
                    response,
                    background: None,
                })
            }
        }
    }

    pub async fn record_answer(&self, request: AnswerRequest) -> WorkflowResult<Turn> {
        if request.response.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "response must not be empty".to_string(),
            ));
        }
        self.store
            .record_answer(
                &request.conversation_id,
                &request.message_id,
                AgentAnswer {
                    response: request.response,
                    reasoning: request.reasoning,
                    tool_calls: request.tool_calls,
                },
            )
            .await
    }

    pub async fn cancel(&self, conversation_id: &str) -> WorkflowResult<Run> {
        self.store.cancel_active(conversation_id).await
    }

    async fn build_context(&self, start: &RequestStart) -> WorkflowResult<PromptContext> {
        let history = self
            .store
            .list_turns(&start.conversation.conversation_id, self.settings.history_turns)
            .await?
            .into_iter()
            .map(|turn| HistoryTurn {
                user_input: turn.user_input,
                agent_answer: turn.agent_answer,
            })
            .collect();
        Ok(PromptContext {
            summary: start.conversation.summary.clone(),
            history,
            user_input: start.run.user_input.clone(),
            clarifications: start.run.checkpoint.clarifications.clone(),
            preferences: start.conversation.preferences.clone(),
        })
    }

    async fn generate_stage(&self, start: &RequestStart) -> WorkflowResult<StageOutcome> {
        let run = &start.run;
        let context = self.build_context(start).await?;
        self.store
            .emit_progress(&run.run_id, EventPayload::progress("Generating subqueries"))
            .await?;

        let allow = run.allow_clarification
            && run.checkpoint.clarifications.len() < self.settings.max_clarifications;
        let outcome = self
            .subqueries
            .generate(&context, allow)
            .await
            .map_err(|e| WorkflowError::Collaborator(e.to_string()))?;

        let mut subqueries = match outcome {
            SubqueryOutcome::Clarify(question) if allow => {
                self.store.pause_run(&run.run_id, &question).await?;
                return Ok(StageOutcome::Paused(question));
            }
            SubqueryOutcome::Clarify(_) => Vec::new(),
            SubqueryOutcome::Subqueries(subqueries) => subqueries,
        };
        if subqueries.is_empty() {
            subqueries.push(run.user_input.clone());
        }

        self.store
            .checkpoint_run(
                &run.run_id,
                CheckpointUpdate::Subqueries(subqueries.clone()),
                Some(EventPayload::progress_with(
                    format!("Generated {} subqueries", subqueries.len()),
                    json!({ "subqueries": subqueries }),
                )),
            )
            .await?;
        Ok(StageOutcome::Subqueries(subqueries))
    }

    async fn retrieval_stage(&self, run_id: &str, subqueries: &[String]) -> WorkflowResult<()> {
        self.store
            .emit_progress(run_id, EventPayload::progress("Retrieving memories"))
            .await?;
        let output = fanout::retrieve_all(
            &self.store,
            self.retriever.clone(),
            run_id,
            subqueries,
            self.settings.retrieval_concurrency,
        )
        .await?;
        self.store
            .checkpoint_run(run_id, CheckpointUpdate::Retrieval(output.clone()), None)
            .await?;
        self.store.complete_run(run_id, output).await?;
        Ok(())
    }

    /// Records a stage error on the run and returns the status it ends in.
    /// `InvalidState` means someone else already settled the run, usually a
    /// cancel, so the pipeline just stops.
    async fn settle_failure(&self, run_id: &str, err: WorkflowError) -> RunStatus {
        if let WorkflowError::InvalidState(reason) = &err {
            info!(run_id = %run_id, "Abandoning run: {}", reason);
            return self.current_status(run_id).await;
        }
        match self.store.fail_run(run_id, &err.to_string(), err.code()).await {
            Ok(run) => run.status,
            Err(fail_err) => {
                warn!(run_id = %run_id, "Could not record failure ({}): {}", err, fail_err);
                self.current_status(run_id).await
            }
        }
    }

    async fn current_status(&self, run_id: &str) -> RunStatus {
        match self.store.get_run(run_id).await {
            Ok(Some(run)) => run.status,
            _ => RunStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests;
