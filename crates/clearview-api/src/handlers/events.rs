//! Server-Sent Events stream of pipeline events.

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive};
use axum::response::Sse;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

use clearview_core::EventEnvelope;

use crate::AppState;

/// `GET /api/v1/events`
///
/// Each SSE `event:` is the namespaced type; `data:` is the JSON envelope.
/// Lagged receivers skip the events they missed.
pub async fn sse_events(
    State(state): State<AppState>,
) -> Sse<impl futures::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let rx = state.events.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(envelope) => to_sse_event(&envelope).map(Ok),
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    )
}

fn to_sse_event(envelope: &EventEnvelope) -> Option<Event> {
    serde_json::to_string(envelope)
        .ok()
        .map(|json| Event::default().event(&envelope.event_type).data(json))
}
