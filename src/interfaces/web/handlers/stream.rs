use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, Query, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::convert::Infallible;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use super::super::AppState;
use super::ApiError;
use crate::core::store::StoredEvent;
use crate::core::stream::{SubscribeOptions, Subscription};

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    cursor: Option<i64>,
    #[serde(default)]
    final_only: bool,
    message_id: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ClientCommand {
    RequestFinal,
    Cancel { cancel_run: bool },
}

#[derive(Deserialize)]
struct RawCommand {
    #[serde(alias = "type")]
    command: String,
    #[serde(default)]
    cancel_run: bool,
}

pub(crate) fn parse_command(text: &str) -> Option<ClientCommand> {
    let raw: RawCommand = serde_json::from_str(text).ok()?;
    match raw.command.as_str() {
        "request_final" | "get_final" => Some(ClientCommand::RequestFinal),
        "cancel" => Some(ClientCommand::Cancel {
            cancel_run: raw.cancel_run,
        }),
        _ => None,
    }
}

/// Wire shape of one event log entry.
pub(crate) fn event_frame(event: &StoredEvent) -> Value {
    json!({
        "type": event.payload.kind(),
        "cursor": event.cursor,
        "message": event.payload.message(),
        "data": event.payload.data(),
        "timestamp": event.created_at,
        "message_id": event.message_id,
        "run_id": event.run_id,
        "is_final": event.is_final,
        "is_error": event.is_error,
    })
}

fn text(value: Value) -> Message {
    Message::Text(value.to_string().into())
}

pub async fn workflow_ws_endpoint(
    ws: WebSocketUpgrade,
    Path(conversation_id): Path<String>,
    Query(query): Query<StreamQuery>,
    State(state): State<AppState>,
) -> Response {
    let options = SubscribeOptions {
        cursor: query.cursor,
        final_only: query.final_only,
        message_id: query.message_id,
    };
    // Subscribing before the upgrade turns an unknown conversation into a 404.
    let subscription = match state.dispatcher.subscribe(&conversation_id, options).await {
        Ok(sub) => sub,
        Err(e) => return ApiError::from(e).into_response(),
    };
    info!(conversation_id = %conversation_id, "Stream subscriber attached");
    ws.on_upgrade(move |socket| handle_stream_socket(socket, subscription, state, conversation_id))
}

async fn handle_stream_socket(
    mut socket: WebSocket,
    mut subscription: Subscription,
    state: AppState,
    conversation_id: String,
) {
    loop {
        tokio::select! {
            event = subscription.next() => match event {
                Some(event) => {
                    if socket.send(text(event_frame(&event))).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = socket.send(text(json!({ "type": "complete" }))).await;
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(body))) => match parse_command(body.as_str()) {
                    Some(ClientCommand::RequestFinal) => {
                        debug!(conversation_id = %conversation_id, "Subscriber switched to final-only");
                        subscription.request_final().await;
                    }
                    Some(ClientCommand::Cancel { cancel_run: false }) => {
                        let _ = socket.send(text(json!({ "type": "complete" }))).await;
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                    Some(ClientCommand::Cancel { cancel_run: true }) => {
                        // The cancelled status event ends the stream on its own.
                        if let Err(e) = state.orchestrator.cancel(&conversation_id).await {
                            let frame = json!({
                                "type": "error",
                                "message": e.to_string(),
                                "data": { "code": e.code() },
                            });
                            if socket.send(text(frame)).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => {
                        let frame = json!({
                            "type": "error",
                            "message": format!("unknown command: {}", body.as_str()),
                            "data": { "code": "VALIDATION_ERROR" },
                        });
                        if socket.send(text(frame)).await.is_err() {
                            break;
                        }
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = socket.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(conversation_id = %conversation_id, "Stream socket error: {}", e);
                    break;
                }
            }
        }
    }
    subscription.cancel().await;
    debug!(conversation_id = %conversation_id, "Stream subscriber released");
}

#[derive(Debug, Default, Deserialize)]
pub struct TailQuery {
    cursor: Option<i64>,
}

/// Server-sent tail of the event log. Resumes from `?cursor=` or the
/// `Last-Event-ID` header and never ends on its own.
pub async fn events_sse_endpoint(
    Path(conversation_id): Path<String>,
    Query(query): Query<TailQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let cursor = query.cursor.or_else(|| {
        headers
            .get("last-event-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    });
    let events = state.dispatcher.read_from(&conversation_id, cursor).await?;
    let stream = events.map(|event| {
        Ok(Event::default()
            .event(event.payload.kind())
            .id(event.cursor.to_string())
            .data(event_frame(&event).to_string()))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
