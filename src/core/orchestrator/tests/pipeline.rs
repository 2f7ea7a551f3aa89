use std::time::Duration;

use serde_json::json;

use super::*;
use crate::core::error::WorkflowError;
use crate::core::orchestrator::AnswerRequest;
use crate::core::workflow::{EventPayload, RunStatus};

#[tokio::test]
async fn blank_input_is_rejected_before_admission() {
    let (orch, seen) = orchestrator(vec![]);
    let err = orch.execute(request(None, "   ")).await.err().unwrap();
    assert!(matches!(err, WorkflowError::Validation(_)));
    assert!(seen.calls().is_empty());
}

#[tokio::test]
async fn clarification_budget_disables_further_questions() {
    let settings = PipelineConfig {
        max_clarifications: 1,
        ..Default::default()
    };
    let (orch, seen) = orchestrator_with(
        vec![clarify("Which region?"), clarify("Which budget?")],
        EchoRetriever::default(),
        settings,
    );
    let first = orch.execute(request(None, "best product?")).await.unwrap().response;
    assert_eq!(first.status, RunStatus::WaitingForInput);

    let second = finish(
        orch.execute(request(Some(&first.conversation_id), "EU"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(second.status, RunStatus::Running);

    let calls = seen.calls();
    assert!(calls[0].1);
    assert!(!calls[1].1, "second call must not allow clarification");

    let turn = orch.store().get_turn(&first.message_id).await.unwrap().unwrap();
    assert_eq!(turn.subqueries, vec!["best product?"]);
}

#[tokio::test]
async fn disallowed_clarification_falls_back_to_user_input() {
    let (orch, seen) = orchestrator(vec![clarify("Which region?")]);
    let mut req = request(None, "best product?");
    req.allow_clarification = false;
    let response = finish(orch.execute(req).await.unwrap()).await;
    assert_eq!(response.status, RunStatus::Running);
    assert!(response.clarification_question.is_none());
    assert!(!seen.calls()[0].1);

    let run = orch
        .store()
        .get_run_by_message(&response.message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.checkpoint.subqueries, vec!["best product?"]);
}

#[tokio::test]
async fn empty_subqueries_fall_back_to_user_input() {
    let (orch, _) = orchestrator(vec![subqueries(&[])]);
    let response = finish(orch.execute(request(None, "hello")).await.unwrap()).await;
    let turn = orch.store().get_turn(&response.message_id).await.unwrap().unwrap();
    assert_eq!(turn.subqueries, vec!["hello"]);
}

#[tokio::test]
async fn subquery_failure_fails_run_and_frees_conversation() {
    let (orch, _) = orchestrator(vec![Err("model unavailable".into())]);
    let response = orch.execute(request(None, "hello")).await.unwrap().response;
    assert_eq!(response.status, RunStatus::Failed);
    let conv = response.conversation_id.clone();

    let log = events(&orch, &conv).await;
    let last = log.last().unwrap();
    assert!(last.is_error);
    match &last.payload {
        EventPayload::Error { message, code } => {
            assert_eq!(code, "COLLABORATOR_FAILURE");
            assert!(message.contains("model unavailable"));
        }
        other => panic!("expected error event, got {:?}", other),
    }

    let conversation = orch.store().get_conversation(&conv).await.unwrap().unwrap();
    assert!(conversation.active_run_id.is_none());
    assert!(conversation.error.is_some());

    let retry = finish(orch.execute(request(Some(&conv), "hello again")).await.unwrap()).await;
    assert_eq!(retry.message, "Workflow continued");
}

#[tokio::test]
async fn retrieval_failure_fails_run_in_background() {
    let (orch, _) = orchestrator_with(
        vec![subqueries(&["good", "bad"])],
        EchoRetriever {
            delay: None,
            fail_on: Some("bad".into()),
        },
        PipelineConfig::default(),
    );
    let response = finish(orch.execute(request(None, "hello")).await.unwrap()).await;
    let run = orch
        .store()
        .get_run_by_message(&response.message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.unwrap().contains("bad"));
    assert!(orch.store().get_turn(&response.message_id).await.unwrap().is_none());
}

#[tokio::test]
async fn fanout_merges_in_subquery_order_under_any_concurrency() {
    for concurrency in [1, 4] {
        let settings = PipelineConfig {
            retrieval_concurrency: concurrency,
            ..Default::default()
        };
        let (orch, _) = orchestrator_with(
            vec![subqueries(&["a", "b", "c"])],
            EchoRetriever::default(),
            settings,
        );
        let response = finish(orch.execute(request(None, "hello")).await.unwrap()).await;
        let turn = orch.store().get_turn(&response.message_id).await.unwrap().unwrap();
        assert_eq!(
            turn.retrieval.memories,
            vec![json!({"query": "a"}), json!({"query": "b"}), json!({"query": "c"})],
            "concurrency {}",
            concurrency
        );
        assert_eq!(turn.retrieval.reasoning_hits.len(), 3);
    }
}

#[tokio::test]
async fn cancel_mid_retrieval_abandons_the_run() {
    let (orch, _) = orchestrator_with(
        vec![subqueries(&["slow"])],
        EchoRetriever {
            delay: Some(Duration::from_millis(200)),
            fail_on: None,
        },
        PipelineConfig::default(),
    );
    let execution = orch.execute(request(None, "hello")).await.unwrap();
    let conv = execution.response.conversation_id.clone();
    let message_id = execution.response.message_id.clone();

    let cancelled = orch.cancel(&conv).await.unwrap();
    assert_eq!(cancelled.status, RunStatus::Cancelled);
    finish(execution).await;

    let run = orch.store().get_run_by_message(&message_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert!(orch.store().get_turn(&message_id).await.unwrap().is_none());

    let log = events(&orch, &conv).await;
    assert!(log.iter().all(|e| !e.is_final));
    let last = log.last().unwrap();
    assert!(matches!(
        last.payload,
        EventPayload::Status {
            status: RunStatus::Cancelled,
            ..
        }
    ));
}

#[tokio::test]
async fn stage_abandoned_after_cancel_reports_cancelled() {
    let (orch, _) = orchestrator(vec![clarify("Which region?")]);
    let paused = orch.execute(request(None, "best product?")).await.unwrap().response;
    let run = orch
        .store()
        .get_run_by_message(&paused.message_id)
        .await
        .unwrap()
        .unwrap();
    orch.cancel(&paused.conversation_id).await.unwrap();

    let status = orch
        .settle_failure(
            &run.run_id,
            WorkflowError::InvalidState("run is cancelled, not running".into()),
        )
        .await;
    assert_eq!(status, RunStatus::Cancelled);
    assert_eq!(serde_json::to_value(status).unwrap(), json!("cancelled"));

    let log = events(&orch, &paused.conversation_id).await;
    assert!(log.iter().all(|e| !e.is_error));
}

#[tokio::test]
async fn cancel_without_active_run_is_invalid_state() {
    let (orch, _) = orchestrator(vec![]);
    let response = finish(orch.execute(request(None, "hello")).await.unwrap()).await;
    let err = orch.cancel(&response.conversation_id).await.err().unwrap();
    assert!(matches!(err, WorkflowError::InvalidState(_)));
}

#[tokio::test]
async fn record_answer_attaches_once() {
    let (orch, _) = orchestrator(vec![]);
    let response = finish(orch.execute(request(None, "hello")).await.unwrap()).await;
    let answer = |text: &str| AnswerRequest {
        conversation_id: response.conversation_id.clone(),
        message_id: response.message_id.clone(),
        response: text.to_string(),
        reasoning: Some("used memory m1".into()),
        tool_calls: None,
    };

    let err = orch.record_answer(answer("  ")).await.err().unwrap();
    assert!(matches!(err, WorkflowError::Validation(_)));

    let turn = orch.record_answer(answer("Here you go.")).await.unwrap();
    assert_eq!(turn.agent_answer.as_deref(), Some("Here you go."));
    assert_eq!(turn.agent_reasoning.as_deref(), Some("used memory m1"));

    let err = orch.record_answer(answer("again")).await.err().unwrap();
    assert!(matches!(err, WorkflowError::InvalidState(_)));
}

#[test]
fn execute_request_accepts_legacy_field_names() {
    let req: ExecuteRequest = serde_json::from_value(json!({
        "workflow_id": "c1",
        "user_input": "hi",
        "ask_clarifications": false
    }))
    .unwrap();
    assert_eq!(req.conversation_id.as_deref(), Some("c1"));
    assert!(!req.allow_clarification);

    let req: ExecuteRequest = serde_json::from_value(json!({"user_input": "hi"})).unwrap();
    assert!(req.allow_clarification);
    assert!(req.conversation_id.is_none());
}
