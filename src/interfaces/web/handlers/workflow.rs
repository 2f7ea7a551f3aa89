use axum::{
    Json,
    extract::rejection::JsonRejection,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::super::AppState;
use super::stream::event_frame;
use super::{ApiResult, success};
use crate::core::error::WorkflowError;
use crate::core::orchestrator::{AnswerRequest, ExecuteRequest};

const DEFAULT_TURN_LIMIT: usize = 50;
const DEFAULT_EVENT_LIMIT: i64 = 200;
const MAX_EVENT_LIMIT: i64 = 1000;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|rejection| WorkflowError::Validation(rejection.body_text()).into())
}

pub async fn execute_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let request = body(payload)?;
    let execution = state.orchestrator.execute(request).await?;
    // Retrieval keeps running detached; clients follow it on the stream.
    drop(execution.background);
    Ok((StatusCode::CREATED, success(&execution.response)?))
}

pub async fn ai_answer_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<AnswerRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let request = body(payload)?;
    let turn = state.orchestrator.record_answer(request).await?;
    success(&json!({ "status": "ok", "turn": turn }))
}

pub async fn get_conversation_endpoint(
    Path(conversation_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let store = state.orchestrator.store();
    let conversation = store
        .get_conversation(&conversation_id)
        .await?
        .ok_or_else(|| WorkflowError::not_found("conversation", &conversation_id))?;
    let active_run = match &conversation.active_run_id {
        Some(run_id) => store.get_run(run_id).await?,
        None => None,
    };
    success(&json!({ "conversation": conversation, "active_run": active_run }))
}

#[derive(Deserialize)]
pub struct TurnsQuery {
    limit: Option<usize>,
}

pub async fn list_turns_endpoint(
    Path(conversation_id): Path<String>,
    Query(query): Query<TurnsQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let store = state.orchestrator.store();
    if store.get_conversation(&conversation_id).await?.is_none() {
        return Err(WorkflowError::not_found("conversation", &conversation_id).into());
    }
    let limit = query.limit.unwrap_or(DEFAULT_TURN_LIMIT).max(1);
    let turns = store.list_turns(&conversation_id, limit).await?;
    success(&json!({ "turns": turns }))
}

pub async fn get_turn_endpoint(
    Path((conversation_id, message_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let turn = state
        .orchestrator
        .store()
        .get_turn(&message_id)
        .await?
        .filter(|turn| turn.conversation_id == conversation_id)
        .ok_or_else(|| WorkflowError::not_found("turn", &message_id))?;
    success(&json!({ "turn": turn }))
}

pub async fn list_runs_endpoint(
    Path(conversation_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let store = state.orchestrator.store();
    if store.get_conversation(&conversation_id).await?.is_none() {
        return Err(WorkflowError::not_found("conversation", &conversation_id).into());
    }
    let runs = store.list_runs(&conversation_id).await?;
    success(&json!({ "runs": runs }))
}

pub async fn get_run_endpoint(
    Path((conversation_id, message_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let run = state
        .orchestrator
        .store()
        .get_run_by_message(&message_id)
        .await?
        .filter(|run| run.conversation_id == conversation_id)
        .ok_or_else(|| WorkflowError::not_found("run", &message_id))?;
    success(&json!({ "run": run }))
}

#[derive(Deserialize)]
pub struct EventsQuery {
    after: Option<i64>,
    limit: Option<i64>,
    message_id: Option<String>,
}

pub async fn list_events_endpoint(
    Path(conversation_id): Path<String>,
    Query(query): Query<EventsQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let store = state.orchestrator.store();
    if store.get_conversation(&conversation_id).await?.is_none() {
        return Err(WorkflowError::not_found("conversation", &conversation_id).into());
    }
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .clamp(1, MAX_EVENT_LIMIT);
    let events = store
        .list_events_after(
            &conversation_id,
            query.after.unwrap_or(0).max(0),
            limit,
            query.message_id.as_deref(),
        )
        .await?;
    let next_cursor = events.last().map(|e| e.cursor);
    let frames: Vec<Value> = events.iter().map(event_frame).collect();
    success(&json!({ "events": frames, "next_cursor": next_cursor }))
}

pub async fn final_event_endpoint(
    Path(conversation_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let store = state.orchestrator.store();
    if store.get_conversation(&conversation_id).await?.is_none() {
        return Err(WorkflowError::not_found("conversation", &conversation_id).into());
    }
    let event = store.read_final(&conversation_id).await?;
    success(&json!({ "event": event.as_ref().map(event_frame) }))
}

pub async fn cancel_endpoint(
    Path(conversation_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let run = state.orchestrator.cancel(&conversation_id).await?;
    success(&json!({ "run": run }))
}

#[derive(Deserialize)]
pub struct SummaryRequest {
    summary: Option<String>,
}

pub async fn update_summary_endpoint(
    Path(conversation_id): Path<String>,
    State(state): State<AppState>,
    payload: Result<Json<SummaryRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let request = body(payload)?;
    let summary = request
        .summary
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let conversation = state
        .orchestrator
        .store()
        .update_summary(&conversation_id, summary)
        .await?;
    success(&json!({ "conversation": conversation }))
}

pub async fn delete_conversation_endpoint(
    Path(conversation_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    state
        .orchestrator
        .store()
        .delete_conversation(&conversation_id)
        .await?;
    success(&json!({ "conversation_id": conversation_id }))
}

pub async fn health_endpoint() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
