use crate::state::{error_reply, run_blocking, ApiReply, AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use triage_core::error::{StoreError, TriageError};
use triage_core::metadata_store::MetadataPayload;

#[derive(Debug, Deserialize)]
pub struct MetadataWriteRequest {
    #[serde(default, alias = "alertId")]
    pub alert_id: Option<String>,
    #[serde(default, alias = "alertIds")]
    pub alert_ids: Option<Vec<String>>,
    #[serde(flatten)]
    pub payload: MetadataPayload,
}

pub fn metadata_router() -> Router<AppState> {
    Router::new()
        .route("/api/alerts/metadata", get(list_metadata).post(save_metadata))
        .route("/api/alerts/metadata/:alert_id", get(get_metadata))
}

pub async fn list_metadata(State(state): State<AppState>) -> ApiReply {
    let store = state.store.clone();
    match run_blocking(move || store.read_all()).await {
        Ok(Ok(records)) => (StatusCode::OK, Json(json!({ "success": true, "data": records }))),
        Ok(Err(err)) => error_reply(&TriageError::Persistence(err)),
        Err(err) => error_reply(&err),
    }
}

pub async fn get_metadata(State(state): State<AppState>, Path(alert_id): Path<String>) -> ApiReply {
    let store = state.store.clone();
    let lookup = alert_id.clone();
    match run_blocking(move || store.read_one(&lookup)).await {
        Ok(Ok(Some(record))) => (StatusCode::OK, Json(json!({ "success": true, "data": record }))),
        Ok(Ok(None)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": format!("no metadata for '{alert_id}'") })),
        ),
        Ok(Err(err)) => error_reply(&TriageError::Persistence(err)),
        Err(err) => error_reply(&err),
    }
}

/// Upserts one id (`alert_id`) or many (`alert_ids`) with the same payload.
/// Changes show up in the alert views on the next poll cycle.
pub async fn save_metadata(
    State(state): State<AppState>,
    Json(request): Json<MetadataWriteRequest>,
) -> ApiReply {
    let ids: Vec<String> = match (request.alert_ids, request.alert_id) {
        (Some(ids), _) if !ids.is_empty() => ids,
        (_, Some(id)) if !id.trim().is_empty() => vec![id],
        _ => {
            return error_reply(&TriageError::Validation(
                "alert_id or alert_ids is required".into(),
            ))
        }
    };

    let attempted = ids.len();
    let store = state.store.clone();
    let payload = request.payload;
    let result = run_blocking(move || {
        if ids.len() == 1 {
            store.write_one(&ids[0], &payload).map(|_| 1)
        } else {
            store.write_bulk(&ids, &payload)
        }
    })
    .await;
    let result = match result {
        Ok(result) => result,
        Err(err) => return error_reply(&err),
    };

    match result {
        Ok(saved) => (StatusCode::OK, Json(json!({ "success": true, "saved": saved }))),
        Err(StoreError::PartialWrite {
            saved, failures, ..
        }) => {
            let errors: Vec<_> = failures
                .into_iter()
                .map(|(alert_id, error)| json!({ "alert_id": alert_id, "error": error }))
                .collect();
            tracing::warn!(saved, failed = errors.len(), "partial metadata write");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "saved": saved, "errors": errors })),
            )
        }
        Err(err) => {
            tracing::warn!(error = %err, attempted, "metadata write failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "saved": 0, "errors": [{ "error": err.to_string() }] })),
            )
        }
    }
}
