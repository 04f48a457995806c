//! # clearview-api
//!
//! HTTP surface for clearview: signed webhook intake, call read paths,
//! manual actions, media, and the pipeline event stream.
//!
//! The router is built from an [`AppState`] of injected collaborators, so
//! tests drive it against the in-memory store with `tower::ServiceExt::oneshot`.

pub mod config;
pub mod error;
pub mod handlers;
pub mod signature;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, Method};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use uuid::Uuid;

use clearview_core::{CallEventRepository, EventBus, PatientRepository};
use clearview_db::BlobStore;
use clearview_jobs::TaskScheduler;

pub use config::{ResendPolicy, ServerConfig, WebhookConfig};
pub use error::ApiError;
pub use signature::{sign, verify, SignatureError, SignatureHeader};

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub calls: Arc<dyn CallEventRepository>,
    pub patients: Arc<dyn PatientRepository>,
    pub blobs: Arc<dyn BlobStore>,
    /// Runs notification pipelines and video tasks off the request path.
    pub scheduler: TaskScheduler,
    /// Event bus for SSE and the telemetry mirror.
    pub events: EventBus,
    pub webhook: Arc<WebhookConfig>,
    pub resend: ResendPolicy,
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Clearview API",
        description = "Voice-agent call intake and patient follow-up"
    ),
    components(schemas(
        clearview_core::CallEvent,
        clearview_core::CallInsights,
        clearview_core::insights::OtherResult,
        clearview_core::CallOutcome,
        clearview_core::VideoStatus,
        clearview_core::NotificationChannel,
        clearview_core::ResendType,
        clearview_core::Patient,
        clearview_core::PropensityScore,
        clearview_core::PropensityTier,
        clearview_core::ReadinessLabel,
        clearview_core::LensInterestLabel,
        clearview_core::scoring::SignalScore,
        clearview_core::scoring::Signal,
        handlers::calls::CallSummary,
    )),
    tags(
        (name = "Webhooks", description = "Signed call-completion intake"),
        (name = "Calls", description = "Call records, insights, and manual actions"),
        (name = "System", description = "Health and event stream")
    )
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Routes without cross-cutting layers.
pub fn routes() -> Router<AppState> {
    use handlers::{calls, events, health, media, webhook};

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/openapi.json", get(openapi_json))
        // Intake
        .route(
            "/api/v1/webhooks/elevenlabs",
            post(webhook::receive_webhook).get(webhook::webhook_status),
        )
        // Calls
        .route("/api/v1/calls", get(calls::list_calls))
        .route("/api/v1/calls/resend", post(calls::resend_notifications))
        .route("/api/v1/calls/:id", get(calls::get_call))
        .route("/api/v1/calls/:id/raw", get(calls::get_call_raw))
        .route("/api/v1/calls/:id/video", get(calls::get_call_video))
        .route("/api/v1/calls/:id/review", patch(calls::toggle_review))
        .route("/api/v1/calls/:id/patient", patch(calls::assign_patient))
        // Media
        .route("/api/v1/media/*key", get(media::get_media))
        // SSE events
        .route("/api/v1/events", get(events::sse_events))
}

/// The full application: routes, tracing, request ids, CORS, and body limit.
pub fn app(state: AppState, config: &ServerConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(config.origin_headers()))
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(3600));

    routes()
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(config.body_limit_bytes))
        .with_state(state)
}
