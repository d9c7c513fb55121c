use crate::state::{error_reply, run_blocking, ApiReply, AppState};
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde_json::json;
use triage_core::health::sensor_health;

pub fn health_router() -> Router<AppState> {
    Router::new()
        .route("/api/health", get(service_health))
        .route("/api/health/sensors", get(sensors_health))
}

/// Store reachability plus the age of the published snapshot.
pub async fn service_health(State(state): State<AppState>) -> ApiReply {
    let store = state.store.clone();
    let ping = run_blocking(move || store.ping()).await;
    let generated_at = state.dashboard.snapshot().generated_at;

    match ping {
        Ok(Ok(())) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "status": "healthy",
                "database": "online",
                "snapshot_generated_at": generated_at,
            })),
        ),
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "metadata store health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "status": "degraded",
                    "database": "offline",
                    "error": err.to_string(),
                    "snapshot_generated_at": generated_at,
                })),
            )
        }
        Err(err) => error_reply(&err),
    }
}

pub async fn sensors_health(State(state): State<AppState>) -> ApiReply {
    let now = Utc::now();
    match sensor_health(&state.feed, now, state.sensor_stale_after) {
        Ok(sensors) => (
            StatusCode::OK,
            Json(json!({ "success": true, "data": sensors, "checked_at": now })),
        ),
        Err(err) => error_reply(&err),
    }
}
