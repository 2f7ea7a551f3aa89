use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};

use crate::interfaces::web::AppState;

/// Live tail of the formatted tracing output. Lines dropped because the
/// client fell behind are reported as a `lagged` event with the count.
pub async fn logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.log_tx.subscribe()).map(|line| {
        Ok(match line {
            Ok(line) => Event::default().event("log").data(line.trim_end()),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                Event::default().event("lagged").data(skipped.to_string())
            }
        })
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
