use std::time::Duration;

use serde_json::{Map, json};

use super::*;
use crate::core::error::WorkflowError;
use crate::core::workflow::{EventPayload, RunStatus};

#[tokio::test]
async fn new_conversation_runs_to_completion() {
    let (orch, _) = orchestrator(vec![subqueries(&["laptops", "budget"])]);
    let response = finish(orch.execute(request(None, "best laptop?")).await.unwrap()).await;
    assert_eq!(response.status, RunStatus::Running);
    assert_eq!(response.message, "Workflow started");
    assert_eq!(response.cursor, 0);

    let conv = response.conversation_id.clone();
    let run = orch
        .store()
        .get_run_by_message(&response.message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.checkpoint.subqueries, vec!["laptops", "budget"]);

    let turn = orch.store().get_turn(&response.message_id).await.unwrap().unwrap();
    assert_eq!(turn.user_input, "best laptop?");
    assert_eq!(
        turn.retrieval.memories,
        vec![json!({"query": "laptops"}), json!({"query": "budget"})]
    );

    let conversation = orch.store().get_conversation(&conv).await.unwrap().unwrap();
    assert!(conversation.active_run_id.is_none());

    let log = events(&orch, &conv).await;
    let msgs = messages(&log);
    assert_eq!(msgs[0], "Generating subqueries");
    assert_eq!(msgs[1], "Generated 2 subqueries");
    assert_eq!(msgs[2], "Retrieving memories");
    assert!(msgs[3].starts_with("Retrieved memories for subquery 1/2"));
    assert!(msgs[4].starts_with("Retrieved memories for subquery 2/2"));
    assert!(log.last().unwrap().is_final);
    assert_eq!(log.iter().filter(|e| e.is_final).count(), 1);
}

#[tokio::test]
async fn clarification_pauses_the_run() {
    let (orch, _) = orchestrator(vec![clarify("Which region?")]);
    let execution = orch.execute(request(None, "best product?")).await.unwrap();
    assert!(execution.background.is_none());
    let response = execution.response;
    assert_eq!(response.status, RunStatus::WaitingForInput);
    assert_eq!(response.clarification_question.as_deref(), Some("Which region?"));

    let run = orch
        .store()
        .get_run_by_message(&response.message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::WaitingForInput);
    assert_eq!(run.checkpoint.pending_question.as_deref(), Some("Which region?"));

    let conversation = orch
        .store()
        .get_conversation(&response.conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.active_run_id.as_deref(), Some(run.run_id.as_str()));

    let log = events(&orch, &response.conversation_id).await;
    let last = log.last().unwrap();
    assert_eq!(last.payload.message(), "Clarification requested");
    assert!(!last.ends_stream);
}

#[tokio::test]
async fn answer_resumes_the_paused_run() {
    let (orch, seen) = orchestrator(vec![clarify("Which region?"), subqueries(&["east coast laptops"])]);
    let first = orch.execute(request(None, "best product?")).await.unwrap().response;
    let conv = first.conversation_id.clone();

    let second = finish(orch.execute(request(Some(&conv), "East coast")).await.unwrap()).await;
    assert_eq!(second.message, "Clarification received");
    assert_eq!(second.message_id, first.message_id);
    assert_eq!(second.status, RunStatus::Running);

    let calls = seen.calls();
    assert_eq!(calls.len(), 2);
    let (context, _) = &calls[1];
    assert_eq!(context.user_input, "best product?");
    assert_eq!(context.clarifications.len(), 1);
    assert_eq!(context.clarifications[0].question, "Which region?");
    assert_eq!(context.clarifications[0].answer, "East coast");

    let turn = orch.store().get_turn(&first.message_id).await.unwrap().unwrap();
    assert_eq!(turn.user_input, "best product?");
    assert_eq!(turn.clarifications.len(), 1);
    assert_eq!(turn.subqueries, vec!["east coast laptops"]);

    let runs = orch.store().list_runs(&conv).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
}

#[tokio::test]
async fn follow_up_starts_a_new_turn_with_history() {
    let (orch, seen) = orchestrator(vec![subqueries(&["laptops"]), subqueries(&["cheaper laptops"])]);
    let first = finish(orch.execute(request(None, "best laptop?")).await.unwrap()).await;
    let conv = first.conversation_id.clone();
    orch.store()
        .update_summary(&conv, Some("Shopping for a laptop."))
        .await
        .unwrap();
    let before = orch.store().latest_cursor(&conv).await.unwrap();

    let second = finish(orch.execute(request(Some(&conv), "anything cheaper?")).await.unwrap()).await;
    assert_eq!(second.message, "Workflow continued");
    assert_ne!(second.message_id, first.message_id);
    assert_eq!(second.cursor, before);

    let (context, _) = &seen.calls()[1];
    assert_eq!(context.summary.as_deref(), Some("Shopping for a laptop."));
    assert_eq!(context.history.len(), 1);
    assert_eq!(context.history[0].user_input, "best laptop?");
    assert!(context.clarifications.is_empty());

    let turns = orch.store().list_turns(&conv, 10).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1].user_input, "anything cheaper?");

    let scoped = orch
        .store()
        .list_events_after(&conv, second.cursor, 100, None)
        .await
        .unwrap();
    assert!(scoped.iter().all(|e| e.message_id.as_deref() == Some(second.message_id.as_str())));
}

#[tokio::test]
async fn request_during_running_run_is_busy() {
    let (orch, _) = orchestrator_with(
        vec![subqueries(&["slow"])],
        EchoRetriever {
            delay: Some(Duration::from_millis(300)),
            fail_on: None,
        },
        PipelineConfig::default(),
    );
    let first = orch.execute(request(None, "first")).await.unwrap();
    let conv = first.response.conversation_id.clone();

    let err = orch.execute(request(Some(&conv), "second")).await.err().unwrap();
    assert!(matches!(err, WorkflowError::Conflict { .. }));
    assert_eq!(err.code(), "BUSY");

    finish(first).await;
    let runs = orch.store().list_runs(&conv).await.unwrap();
    assert_eq!(runs.len(), 1);
}

#[tokio::test]
async fn unknown_conversation_is_not_found() {
    let (orch, seen) = orchestrator(vec![]);
    let err = orch
        .execute(request(Some("no-such-conversation"), "hello"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, WorkflowError::NotFound { .. }));
    assert!(seen.calls().is_empty());
}

#[tokio::test]
async fn preferences_reach_the_prompt_context() {
    let (orch, seen) = orchestrator(vec![]);
    let mut prefs = Map::new();
    prefs.insert("region".into(), json!("EU"));
    let mut req = request(None, "hello");
    req.preferences = Some(prefs);
    let response = finish(orch.execute(req).await.unwrap()).await;

    let (context, _) = &seen.calls()[0];
    assert_eq!(context.preferences.get("region"), Some(&json!("EU")));

    let log = events(&orch, &response.conversation_id).await;
    assert!(matches!(log.last().unwrap().payload, EventPayload::Result(_)));
}
