use axum::extract::State;
use axum::Json;
use serde_json::{json, Value as JsonValue};

use crate::AppState;

/// `GET /health`
pub async fn health_check(State(state): State<AppState>) -> Json<JsonValue> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "tasks": {
            "accepting": state.scheduler.is_accepting(),
            "inFlight": state.scheduler.in_flight(),
            "running": state.scheduler.running_counts(),
        },
        "eventSubscribers": state.events.subscriber_count(),
    }))
}
