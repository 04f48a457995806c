//! Pipeline event types, envelope schema, and event bus.
//!
//! Intake, the task scheduler, the orchestrator, and the video controller all
//! publish onto one broadcast channel. Consumers (SSE stream, telemetry
//! mirror) subscribe independently.
//!
//! ## Wire Format (SSE)
//!
//! ```text
//! event: notification.sent
//! id: 019508a0-1234-7def-8000-abcdef123456
//! data: {"event_id":"...","event_type":"notification.sent","occurred_at":"...","payload":{...}}
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{NotificationChannel, VideoStatus};

/// Actor metadata for event attribution.
#[derive(Debug, Clone, Serialize)]
pub struct EventActor {
    /// Actor type: `"system"`, `"webhook"`, or `"staff"`.
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl EventActor {
    /// Background tasks and internal processes.
    pub fn system() -> Self {
        Self {
            kind: "system".to_string(),
            id: None,
        }
    }

    /// The voice-agent platform delivering a webhook.
    pub fn webhook() -> Self {
        Self {
            kind: "webhook".to_string(),
            id: None,
        }
    }

    /// Clinic staff acting through the API (resend, review, tagging).
    pub fn staff(id: Option<String>) -> Self {
        Self {
            kind: "staff".to_string(),
            id,
        }
    }
}

/// Optional emission context.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    pub actor: Option<EventActor>,
    /// Correlation ID (usually the HTTP request id).
    pub correlation_id: Option<Uuid>,
}

/// Versioned event envelope.
///
/// `payload_version` increments on breaking payload changes; consumers
/// ignore unknown fields.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// UUIDv7 event id.
    pub event_id: Uuid,
    /// Namespaced event type (e.g. `"call.received"`, `"task.failed"`).
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub actor: EventActor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    pub payload_version: u32,
    pub payload: ServerEvent,
}

impl EventEnvelope {
    pub fn new(event: ServerEvent) -> Self {
        Self::with_context(event, EventContext::default())
    }

    pub fn with_context(event: ServerEvent, ctx: EventContext) -> Self {
        let event_type = event.namespaced_event_type().to_string();
        let entity_type = event.entity_type().map(String::from);
        let entity_id = event.entity_id().map(|id| id.to_string());

        Self {
            event_id: crate::uuid_utils::new_v7(),
            event_type,
            occurred_at: Utc::now(),
            actor: ctx.actor.unwrap_or_else(EventActor::system),
            entity_type,
            entity_id,
            correlation_id: ctx.correlation_id,
            payload_version: 1,
            payload: event,
        }
    }
}

/// Domain events, serialized with a `type` tag:
/// `{"type":"TaskStarted","task_id":"...","task_kind":"video_generation",...}`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// A webhook delivery was verified and stored.
    CallReceived {
        call_id: Uuid,
        conversation_id: String,
    },
    /// A background task was submitted.
    TaskQueued {
        task_id: Uuid,
        task_kind: String,
        call_id: Uuid,
    },
    TaskStarted {
        task_id: Uuid,
        task_kind: String,
        call_id: Uuid,
    },
    TaskCompleted {
        task_id: Uuid,
        task_kind: String,
        call_id: Uuid,
        duration_ms: u64,
    },
    TaskFailed {
        task_id: Uuid,
        task_kind: String,
        call_id: Uuid,
        error: String,
    },
    /// An outbound email was accepted by the provider.
    NotificationSent {
        call_id: Uuid,
        channel: NotificationChannel,
    },
    NotificationFailed {
        call_id: Uuid,
        channel: NotificationChannel,
        error: String,
    },
    /// The persisted video state moved.
    VideoStatusChanged {
        call_id: Uuid,
        status: VideoStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        video_url: Option<String>,
    },
}

impl ServerEvent {
    /// Variant name, as used in the `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CallReceived { .. } => "CallReceived",
            Self::TaskQueued { .. } => "TaskQueued",
            Self::TaskStarted { .. } => "TaskStarted",
            Self::TaskCompleted { .. } => "TaskCompleted",
            Self::TaskFailed { .. } => "TaskFailed",
            Self::NotificationSent { .. } => "NotificationSent",
            Self::NotificationFailed { .. } => "NotificationFailed",
            Self::VideoStatusChanged { .. } => "VideoStatusChanged",
        }
    }

    /// Dot-namespaced type used as the SSE `event:` name.
    pub fn namespaced_event_type(&self) -> &'static str {
        match self {
            Self::CallReceived { .. } => "call.received",
            Self::TaskQueued { .. } => "task.queued",
            Self::TaskStarted { .. } => "task.started",
            Self::TaskCompleted { .. } => "task.completed",
            Self::TaskFailed { .. } => "task.failed",
            Self::NotificationSent { .. } => "notification.sent",
            Self::NotificationFailed { .. } => "notification.failed",
            Self::VideoStatusChanged { .. } => "video.status_changed",
        }
    }

    pub fn entity_type(&self) -> Option<&'static str> {
        match self {
            Self::TaskQueued { .. }
            | Self::TaskStarted { .. }
            | Self::TaskCompleted { .. }
            | Self::TaskFailed { .. } => Some("task"),
            _ => Some("call"),
        }
    }

    pub fn entity_id(&self) -> Option<Uuid> {
        match self {
            Self::TaskQueued { task_id, .. }
            | Self::TaskStarted { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. } => Some(*task_id),
            Self::CallReceived { call_id, .. }
            | Self::NotificationSent { call_id, .. }
            | Self::NotificationFailed { call_id, .. }
            | Self::VideoStatusChanged { call_id, .. } => Some(*call_id),
        }
    }

    /// Call the event concerns.
    pub fn call_id(&self) -> Uuid {
        match self {
            Self::CallReceived { call_id, .. }
            | Self::TaskQueued { call_id, .. }
            | Self::TaskStarted { call_id, .. }
            | Self::TaskCompleted { call_id, .. }
            | Self::TaskFailed { call_id, .. }
            | Self::NotificationSent { call_id, .. }
            | Self::NotificationFailed { call_id, .. }
            | Self::VideoStatusChanged { call_id, .. } => *call_id,
        }
    }
}

/// Broadcast bus for pipeline events.
///
/// Slow receivers that fall behind get `Lagged` and miss events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit with a system actor. Dropped silently when nobody listens.
    pub fn emit(&self, event: ServerEvent) {
        self.emit_with_context(event, EventContext::default());
    }

    pub fn emit_with_context(&self, event: ServerEvent, ctx: EventContext) {
        let envelope = EventEnvelope::with_context(event, ctx);
        tracing::debug!(
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            subscriber_count = self.tx.receiver_count(),
            "EventBus emit"
        );
        let _ = self.tx.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_emit_subscribe() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();
        let call_id = Uuid::new_v4();

        bus.emit(ServerEvent::CallReceived {
            call_id,
            conversation_id: "conv_1".to_string(),
        });

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.event_type, "call.received");
        assert_eq!(envelope.entity_type.as_deref(), Some("call"));
        assert_eq!(envelope.entity_id, Some(call_id.to_string()));
        assert_eq!(envelope.actor.kind, "system");
        assert_eq!(envelope.payload_version, 1);
    }

    #[tokio::test]
    async fn test_event_bus_no_subscribers_ok() {
        let bus = EventBus::new(4);
        bus.emit(ServerEvent::NotificationSent {
            call_id: Uuid::new_v4(),
            channel: NotificationChannel::Doctor,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_event_bus_multiple_subscribers() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(ServerEvent::VideoStatusChanged {
            call_id: Uuid::new_v4(),
            status: VideoStatus::Generating,
            video_url: None,
        });

        assert_eq!(a.recv().await.unwrap().event_type, "video.status_changed");
        assert_eq!(b.recv().await.unwrap().event_type, "video.status_changed");
    }

    #[tokio::test]
    async fn test_context_actor_and_correlation() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let correlation = Uuid::new_v4();

        bus.emit_with_context(
            ServerEvent::CallReceived {
                call_id: Uuid::new_v4(),
                conversation_id: "c".to_string(),
            },
            EventContext {
                actor: Some(EventActor::webhook()),
                correlation_id: Some(correlation),
            },
        );

        let env = rx.recv().await.unwrap();
        assert_eq!(env.actor.kind, "webhook");
        assert_eq!(env.correlation_id, Some(correlation));
    }

    #[test]
    fn test_task_event_json() {
        let task_id = Uuid::new_v4();
        let event = ServerEvent::TaskFailed {
            task_id,
            task_kind: "video_generation".to_string(),
            call_id: Uuid::new_v4(),
            error: "timeout".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "TaskFailed");
        assert_eq!(json["task_kind"], "video_generation");
        assert_eq!(event.entity_type(), Some("task"));
        assert_eq!(event.entity_id(), Some(task_id));
    }

    #[test]
    fn test_notification_channel_serializes_lowercase() {
        let event = ServerEvent::NotificationFailed {
            call_id: Uuid::nil(),
            channel: NotificationChannel::Patient,
            error: "bounced".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["channel"], "patient");
    }

    #[tokio::test]
    async fn test_event_bus_lagged_receiver() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for _ in 0..5 {
            bus.emit(ServerEvent::CallReceived {
                call_id: Uuid::new_v4(),
                conversation_id: "c".to_string(),
            });
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }
}
