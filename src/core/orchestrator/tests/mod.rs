mod pipeline;
mod scenarios;

use std::sync::Arc;

use super::{ExecuteRequest, ExecuteResponse, Execution, Orchestrator};
use crate::core::collaborators::SubqueryOutcome;
use crate::core::collaborators::testing::{EchoRetriever, ScriptedSubqueries};
use crate::core::config::PipelineConfig;
use crate::core::store::{StoredEvent, test_store};

fn orchestrator_with(
    script: Vec<Result<SubqueryOutcome, String>>,
    retriever: EchoRetriever,
    settings: PipelineConfig,
) -> (Orchestrator, Arc<ScriptedSubqueries>) {
    let subqueries = Arc::new(ScriptedSubqueries::new(script));
    let orchestrator = Orchestrator::new(
        test_store(),
        subqueries.clone(),
        Arc::new(retriever),
        settings,
    );
    (orchestrator, subqueries)
}

fn orchestrator(
    script: Vec<Result<SubqueryOutcome, String>>,
) -> (Orchestrator, Arc<ScriptedSubqueries>) {
    orchestrator_with(script, EchoRetriever::default(), PipelineConfig::default())
}

fn request(conversation_id: Option<&str>, user_input: &str) -> ExecuteRequest {
    ExecuteRequest {
        conversation_id: conversation_id.map(String::from),
        user_input: user_input.to_string(),
        allow_clarification: true,
        preferences: None,
    }
}

fn subqueries(items: &[&str]) -> Result<SubqueryOutcome, String> {
    Ok(SubqueryOutcome::Subqueries(
        items.iter().map(|s| s.to_string()).collect(),
    ))
}

fn clarify(question: &str) -> Result<SubqueryOutcome, String> {
    Ok(SubqueryOutcome::Clarify(question.to_string()))
}

/// Waits for background retrieval and returns the immediate response.
async fn finish(execution: Execution) -> ExecuteResponse {
    if let Some(handle) = execution.background {
        handle.await.unwrap();
    }
    execution.response
}

async fn events(orchestrator: &Orchestrator, conversation_id: &str) -> Vec<StoredEvent> {
    orchestrator
        .store()
        .list_events_after(conversation_id, 0, 1000, None)
        .await
        .unwrap()
}

fn messages(events: &[StoredEvent]) -> Vec<String> {
    events.iter().map(|e| e.payload.message()).collect()
}
