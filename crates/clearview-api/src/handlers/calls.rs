//! Call read paths and manual actions.

use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use clearview_core::{
    defaults, CallEvent, CallInsights, CallOutcome, ConversationData, ListCallsRequest, Patient,
    PropensityScore, ResendType, VideoStatus,
};
use clearview_jobs::{DisplayFields, TaskKind};

use super::ListResponse;
use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListCallsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// One row of the call list.
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CallSummary {
    pub id: Uuid,
    pub conversation_id: String,
    pub patient_name: String,
    pub email: Option<String>,
    pub call_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub call_outcome: CallOutcome,
    pub call_successful: Option<bool>,
    pub call_duration_secs: Option<i32>,
    pub vision_scale: Option<i32>,
    pub doctor_email_sent_at: Option<DateTime<Utc>>,
    pub patient_email_sent_at: Option<DateTime<Utc>>,
    pub video_status: VideoStatus,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub patient_id: Option<Uuid>,
    pub propensity: PropensityScore,
}

/// Full record plus computed insights.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallDetail {
    #[serde(flatten)]
    pub call: CallEvent,
    pub insights: CallInsights,
    pub propensity: PropensityScore,
    pub summary: Option<String>,
    pub patient: Option<Patient>,
}

/// Stored payload re-parsed in delivery order. Unparseable rows read as empty.
fn conversation_data(call: &CallEvent) -> ConversationData {
    ConversationData::from_raw_body(&call.source_body()).unwrap_or_else(|e| {
        debug!(call_id = %call.id, error = %e, "Stored payload did not parse");
        ConversationData::default()
    })
}

fn resolve(call: &CallEvent, patient: Option<&Patient>) -> DisplayFields {
    DisplayFields::resolve(
        &conversation_data(call),
        &call.scalars(),
        call.call_started_at.or(call.event_timestamp),
        patient,
    )
}

fn summarize(call: CallEvent) -> CallSummary {
    let fields = resolve(&call, None);
    CallSummary {
        id: call.id,
        conversation_id: call.conversation_id,
        patient_name: fields.patient_name,
        email: fields.email,
        call_started_at: fields.call_timestamp,
        created_at: call.created_at,
        call_outcome: call.call_outcome,
        call_successful: call.call_outcome.as_bool(),
        call_duration_secs: call.call_duration_secs,
        vision_scale: call.vision_scale,
        doctor_email_sent_at: call.doctor_email_sent_at,
        patient_email_sent_at: call.patient_email_sent_at,
        video_status: call.video_status,
        reviewed_at: call.reviewed_at,
        patient_id: call.patient_id,
        propensity: fields.propensity,
    }
}

async fn load_call(state: &AppState, id: Uuid) -> Result<CallEvent, ApiError> {
    state
        .calls
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Call {} not found", id)))
}

/// `GET /api/v1/calls`
pub async fn list_calls(
    State(state): State<AppState>,
    Query(query): Query<ListCallsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query
        .limit
        .unwrap_or(defaults::PAGE_LIMIT)
        .clamp(1, defaults::PAGE_LIMIT_MAX);
    let offset = query.offset.unwrap_or(defaults::PAGE_OFFSET).max(0);

    let page = state
        .calls
        .list(ListCallsRequest {
            limit: Some(limit),
            offset: Some(offset),
        })
        .await?;

    let data: Vec<CallSummary> = page.calls.into_iter().map(summarize).collect();
    Ok(Json(ListResponse::new(
        data,
        page.total.max(0) as usize,
        limit as usize,
        offset as usize,
    )))
}

/// `GET /api/v1/calls/:id`
pub async fn get_call(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let call = load_call(&state, id).await?;
    let patient = match call.patient_id {
        Some(patient_id) => state.patients.get(patient_id).await?,
        None => None,
    };
    let fields = resolve(&call, patient.as_ref());

    Ok(Json(CallDetail {
        call,
        insights: fields.insights,
        propensity: fields.propensity,
        summary: fields.summary,
        patient,
    }))
}

/// `GET /api/v1/calls/:id/raw`: the payload exactly as delivered.
pub async fn get_call_raw(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let call = load_call(&state, id).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/json")],
        call.source_body(),
    ))
}

/// `GET /api/v1/calls/:id/video`
pub async fn get_call_video(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let call = load_call(&state, id).await?;
    Ok(Json(json!({
        "videoStatus": call.video_status,
        "videoUrl": call.video_url,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResendBody {
    pub call_id: Uuid,
    #[serde(rename = "type", default)]
    pub resend_type: Option<String>,
}

/// `POST /api/v1/calls/resend`
///
/// Always re-runs the full notification sequence; `type` is validated,
/// echoed, and logged only.
pub async fn resend_notifications(
    State(state): State<AppState>,
    Json(body): Json<ResendBody>,
) -> Result<impl IntoResponse, ApiError> {
    let resend_type = match body.resend_type.as_deref() {
        Some(t) => ResendType::from_str(t).map_err(ApiError::BadRequest)?,
        None => ResendType::default(),
    };

    let call = load_call(&state, body.call_id).await?;

    if state.resend.blocks(call.video_status, call.updated_at, Utc::now()) {
        return Err(ApiError::Conflict(format!(
            "Video generation in progress for call {}",
            call.id
        )));
    }

    if resend_type != ResendType::Both {
        warn!(
            subsystem = "api",
            component = "resend",
            call_id = %call.id,
            requested = %resend_type,
            "Channel-specific resend requested; re-running full sequence"
        );
    }

    let ticket = state
        .scheduler
        .submit(
            TaskKind::NotificationPipeline,
            call.id,
            json!({ "trigger": "resend", "type": resend_type }),
        )
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    info!(
        subsystem = "api",
        component = "resend",
        call_id = %call.id,
        task_id = %ticket.task_id,
        resend_type = %resend_type,
        "Resend queued"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "queued": true,
            "taskId": ticket.task_id,
            "type": resend_type,
        })),
    ))
}

/// `PATCH /api/v1/calls/:id/review`: toggles the review timestamp.
pub async fn toggle_review(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let reviewed_at = state.calls.toggle_review(id, Utc::now()).await?;
    Ok(Json(json!({
        "id": id,
        "reviewedAt": reviewed_at,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignPatientBody {
    #[serde(default)]
    pub patient_id: Option<Uuid>,
}

/// `PATCH /api/v1/calls/:id/patient`: attach or detach (`null`) a patient.
pub async fn assign_patient(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AssignPatientBody>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(patient_id) = body.patient_id {
        if state.patients.get(patient_id).await?.is_none() {
            return Err(ApiError::NotFound(format!(
                "Patient {} not found",
                patient_id
            )));
        }
    }

    state.calls.assign_patient(id, body.patient_id).await?;
    Ok(Json(json!({
        "id": id,
        "patientId": body.patient_id,
    })))
}
