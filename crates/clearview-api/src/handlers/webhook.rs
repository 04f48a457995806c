//! Webhook intake.
//!
//! Verify, upsert, answer. The notification pipeline is submitted to the
//! scheduler and runs after the response; the platform never sees its
//! outcome.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, error, info, warn};

use clearview_core::{
    defaults, derive_scalars, ConversationData, EventActor, EventContext, NewCallEvent,
    ServerEvent, WebhookEvent,
};
use clearview_jobs::TaskKind;

use crate::error::ApiError;
use crate::signature::{self, SignatureError};
use crate::AppState;

/// Event type carrying a finished call's analysis.
pub const POST_CALL_TRANSCRIPTION: &str = "post_call_transcription";

/// `POST /api/v1/webhooks/elevenlabs`
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<JsonValue>, ApiError> {
    let Some(secret) = state.webhook.secret.as_deref() else {
        error!(
            subsystem = "api",
            component = "webhook",
            "Webhook secret not configured; rejecting delivery"
        );
        return Err(ApiError::Internal("webhook secret not configured".to_string()));
    };

    let header = headers
        .get(defaults::WEBHOOK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(SignatureError::MissingHeader);

    let verified = header.and_then(|h| {
        signature::verify(
            &body,
            h,
            secret,
            state.webhook.tolerance_secs,
            Utc::now().timestamp(),
        )
    });
    if let Err(e) = verified {
        warn!(
            subsystem = "api",
            component = "webhook",
            op = "verify",
            error = %e,
            "Webhook rejected"
        );
        return Err(e.into());
    }

    let raw_payload: JsonValue = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {}", e)))?;
    let envelope: WebhookEvent = serde_json::from_value(raw_payload.clone())
        .map_err(|e| ApiError::BadRequest(format!("invalid webhook envelope: {}", e)))?;

    if envelope.event_type != POST_CALL_TRANSCRIPTION {
        debug!(
            subsystem = "api",
            component = "webhook",
            event_type = %envelope.event_type,
            "Ignoring webhook event type"
        );
        return Ok(Json(json!({ "received": true })));
    }

    let data = ConversationData::from_value(&envelope.data);
    let conversation_id = data
        .conversation_id
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .ok_or_else(|| ApiError::BadRequest("missing data.conversation_id".to_string()))?;

    // Valid JSON is valid UTF-8.
    let raw_body = String::from_utf8(body.to_vec())
        .map_err(|_| ApiError::BadRequest("body is not UTF-8".to_string()))?;

    let new_event = NewCallEvent {
        conversation_id: conversation_id.clone(),
        agent_id: data.agent_id.clone(),
        event_type: envelope.event_type.clone(),
        raw_payload,
        raw_body,
        event_timestamp: envelope.occurred_at(),
        call_started_at: data.started_at(),
        scalars: derive_scalars(&data),
    };

    let call = state.calls.upsert_from_webhook(new_event).await.map_err(|e| {
        error!(
            subsystem = "api",
            component = "webhook",
            op = "upsert",
            %conversation_id,
            error = %e,
            "Failed to store call event"
        );
        ApiError::Internal("failed to store call event".to_string())
    })?;

    info!(
        subsystem = "api",
        component = "webhook",
        call_id = %call.id,
        %conversation_id,
        "Call event stored"
    );

    state.events.emit_with_context(
        ServerEvent::CallReceived {
            call_id: call.id,
            conversation_id,
        },
        EventContext {
            actor: Some(EventActor::webhook()),
            correlation_id: None,
        },
    );

    if let Err(e) = state
        .scheduler
        .submit(
            TaskKind::NotificationPipeline,
            call.id,
            json!({ "trigger": "webhook" }),
        )
        .await
    {
        warn!(
            subsystem = "api",
            component = "webhook",
            call_id = %call.id,
            error = %e,
            "Notification pipeline not queued"
        );
    }

    Ok(Json(json!({ "received": true })))
}

/// `GET /api/v1/webhooks/elevenlabs`
pub async fn webhook_status() -> Json<JsonValue> {
    Json(json!({
        "status": "ok",
        "message": "Webhook endpoint is active",
    }))
}
