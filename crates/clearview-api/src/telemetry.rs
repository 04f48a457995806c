//! Telemetry mirror: structured tracing for every event bus event.
//!
//! Field names come from [`clearview_core::logging`] so mirrored events can be
//! queried with the same keys as the emitting subsystem's own logs.

use tokio::sync::broadcast::error::RecvError;
use tracing::field::display;

use clearview_core::logging::{
    CALL_ID, CHANNEL, CONVERSATION_ID, DURATION_MS, ERROR_MSG, TASK_ID, TASK_KIND,
};
use clearview_core::{EventBus, EventEnvelope, ServerEvent};

/// Log each event under the `clearview::events` target until every other
/// handle to the bus is dropped.
pub async fn telemetry_mirror(events: EventBus) {
    let mut rx = events.subscribe();
    drop(events);
    loop {
        match rx.recv().await {
            Ok(envelope) => mirror(&envelope),
            Err(RecvError::Lagged(n)) => {
                tracing::warn!(missed = n, "Telemetry mirror lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn mirror(envelope: &EventEnvelope) {
    let event = envelope.event_type.as_str();
    match &envelope.payload {
        ServerEvent::CallReceived {
            call_id,
            conversation_id,
        } => {
            tracing::info!(
                target: "clearview::events",
                event,
                { CALL_ID } = display(call_id),
                { CONVERSATION_ID } = display(conversation_id),
                "Call received"
            );
        }
        ServerEvent::TaskQueued {
            task_id,
            task_kind,
            call_id,
        }
        | ServerEvent::TaskStarted {
            task_id,
            task_kind,
            call_id,
        } => {
            tracing::debug!(
                target: "clearview::events",
                event,
                { TASK_ID } = display(task_id),
                { TASK_KIND } = display(task_kind),
                { CALL_ID } = display(call_id),
                "Task transition"
            );
        }
        ServerEvent::TaskCompleted {
            task_id,
            task_kind,
            call_id,
            duration_ms,
        } => {
            tracing::info!(
                target: "clearview::events",
                event,
                { TASK_ID } = display(task_id),
                { TASK_KIND } = display(task_kind),
                { CALL_ID } = display(call_id),
                { DURATION_MS } = *duration_ms,
                "Task completed"
            );
        }
        ServerEvent::TaskFailed {
            task_id,
            task_kind,
            call_id,
            error,
        } => {
            tracing::warn!(
                target: "clearview::events",
                event,
                { TASK_ID } = display(task_id),
                { TASK_KIND } = display(task_kind),
                { CALL_ID } = display(call_id),
                { ERROR_MSG } = display(error),
                "Task failed"
            );
        }
        ServerEvent::NotificationSent { call_id, channel } => {
            tracing::info!(
                target: "clearview::events",
                event,
                { CALL_ID } = display(call_id),
                { CHANNEL } = display(channel),
                "Notification sent"
            );
        }
        ServerEvent::NotificationFailed {
            call_id,
            channel,
            error,
        } => {
            tracing::warn!(
                target: "clearview::events",
                event,
                { CALL_ID } = display(call_id),
                { CHANNEL } = display(channel),
                { ERROR_MSG } = display(error),
                "Notification failed"
            );
        }
        ServerEvent::VideoStatusChanged {
            call_id, status, ..
        } => {
            tracing::info!(
                target: "clearview::events",
                event,
                { CALL_ID } = display(call_id),
                status = %status,
                "Video status changed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_mirror_exits_when_bus_closes() {
        let events = EventBus::default();
        let handle = tokio::spawn(telemetry_mirror(events.clone()));
        tokio::task::yield_now().await;

        events.emit(ServerEvent::CallReceived {
            call_id: Uuid::now_v7(),
            conversation_id: "conv_mirror".to_string(),
        });
        drop(events);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("mirror did not stop")
            .unwrap();
    }
}
