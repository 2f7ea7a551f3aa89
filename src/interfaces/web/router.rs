use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::handlers::{logs, stream, workflow};

fn build_localhost_cors(api_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(workflow::health_endpoint))
        .route("/workflow/execute", post(workflow::execute_endpoint))
        .route("/workflow/ai-answer", post(workflow::ai_answer_endpoint))
        .route(
            "/workflow/ws/{conversation_id}",
            get(stream::workflow_ws_endpoint),
        )
        .route(
            "/workflow/{conversation_id}",
            get(workflow::get_conversation_endpoint)
                .delete(workflow::delete_conversation_endpoint),
        )
        .route(
            "/workflow/{conversation_id}/turns",
            get(workflow::list_turns_endpoint),
        )
        .route(
            "/workflow/{conversation_id}/turns/{message_id}",
            get(workflow::get_turn_endpoint),
        )
        .route(
            "/workflow/{conversation_id}/runs",
            get(workflow::list_runs_endpoint),
        )
        .route(
            "/workflow/{conversation_id}/runs/{message_id}",
            get(workflow::get_run_endpoint),
        )
        .route(
            "/workflow/{conversation_id}/events",
            get(workflow::list_events_endpoint),
        )
        .route(
            "/workflow/{conversation_id}/events/stream",
            get(stream::events_sse_endpoint),
        )
        .route(
            "/workflow/{conversation_id}/final",
            get(workflow::final_event_endpoint),
        )
        .route(
            "/workflow/{conversation_id}/cancel",
            post(workflow::cancel_endpoint),
        )
        .route(
            "/workflow/{conversation_id}/summary",
            post(workflow::update_summary_endpoint),
        )
        .route("/api/logs", get(logs::logs_endpoint))
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(state.api_port))
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}
