use crate::state::{error_reply, run_blocking, ApiReply, AppState};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use triage_core::consolidate::ConsolidationMode;
use triage_core::error::TriageError;
use triage_core::filter::AlertFilter;
use triage_core::metadata_store::MetadataPayload;
use triage_core::writeback::WriteTarget;

#[derive(Debug, Default, Deserialize)]
pub struct AlertsQuery {
    pub search: Option<String>,
    pub severity: Option<String>,
    pub status: Option<String>,
    pub name: Option<String>,
    pub source: Option<String>,
    /// `true`/`consolidated` or `false`/`raw`; the configured mode otherwise.
    pub consolidate: Option<String>,
}

impl AlertsQuery {
    fn filter(&self) -> AlertFilter {
        AlertFilter {
            search: self.search.clone(),
            severity: self.severity.clone(),
            status: self.status.clone(),
            label: self.name.clone(),
            source: self.source.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub target: WriteTarget,
    #[serde(flatten)]
    pub payload: MetadataPayload,
}

#[derive(Debug, Deserialize)]
pub struct ArchiveRequest {
    pub target: WriteTarget,
    #[serde(default)]
    pub reason: String,
}

pub fn alerts_router() -> Router<AppState> {
    Router::new()
        .route("/api/alerts", get(list_alerts))
        .route("/api/alerts/edit", post(edit_alerts))
        .route("/api/alerts/archive", post(archive_alerts))
        .route("/api/alerts/refresh", post(refresh_alerts))
        .route("/api/schema/feeds", get(feed_schemas))
}

pub async fn list_alerts(State(state): State<AppState>, Query(query): Query<AlertsQuery>) -> ApiReply {
    let mode = match query.consolidate.as_deref().map(str::parse::<ConsolidationMode>) {
        None => None,
        Some(Ok(mode)) => Some(mode),
        Some(Err(reason)) => return error_reply(&TriageError::Validation(reason)),
    };

    let snapshot = state.dashboard.snapshot();
    let view = state.dashboard.view(&query.filter(), mode);
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "generated_at": snapshot.generated_at,
            "view": view,
            "labels": snapshot.labels,
            "summary": snapshot.summary,
            "notices": snapshot.notices,
        })),
    )
}

pub async fn edit_alerts(State(state): State<AppState>, Json(request): Json<EditRequest>) -> ApiReply {
    let dashboard = state.dashboard.clone();
    match run_blocking(move || dashboard.edit(&request.target, request.payload)).await {
        Ok(Ok(receipt)) => (StatusCode::OK, Json(json!({ "success": true, "data": receipt }))),
        Ok(Err(err)) | Err(err) => error_reply(&err),
    }
}

pub async fn archive_alerts(
    State(state): State<AppState>,
    Json(request): Json<ArchiveRequest>,
) -> ApiReply {
    let dashboard = state.dashboard.clone();
    match run_blocking(move || dashboard.archive(&request.target, &request.reason)).await {
        Ok(Ok(receipt)) => (StatusCode::OK, Json(json!({ "success": true, "data": receipt }))),
        Ok(Err(err)) | Err(err) => error_reply(&err),
    }
}

pub async fn refresh_alerts(State(state): State<AppState>) -> ApiReply {
    let dashboard = state.dashboard.clone();
    match run_blocking(move || dashboard.refresh()).await {
        Ok(Ok(outcome)) => (StatusCode::OK, Json(json!({ "success": true, "data": outcome }))),
        Ok(Err(err)) | Err(err) => error_reply(&err),
    }
}

pub async fn feed_schemas() -> ApiReply {
    (StatusCode::OK, Json(sensor_registry::feed_schemas()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::build_state;
    use sensor_registry::SignatureEventV1;
    use triage_core::config::TriageConfig;

    fn state_with_scans(timestamps: &[&str]) -> AppState {
        let state = build_state(&TriageConfig {
            db_path: None,
            ..TriageConfig::default()
        })
        .expect("state");
        for ts in timestamps {
            state
                .feed
                .push_signature(SignatureEventV1 {
                    timestamp: (*ts).into(),
                    severity: Some(1),
                    signature: Some("Port Scan Detected".into()),
                    src_ip: Some("10.0.0.5".into()),
                    src_port: Some(51515),
                    dest_ip: Some("10.0.0.9".into()),
                    dest_port: Some(22),
                    protocol: Some("TCP".into()),
                    raw: None,
                })
                .expect("push");
        }
        state
    }

    #[tokio::test]
    async fn lists_consolidated_and_raw_views() {
        let state = state_with_scans(&[
            "2024-05-01T09:00:00Z",
            "2024-05-01T09:01:30Z",
            "2024-05-01T09:12:00Z",
        ]);
        let (status, _) = refresh_alerts(State(state.clone())).await;
        assert_eq!(status, StatusCode::OK);

        let (status, Json(body)) = list_alerts(State(state.clone()), Query(AlertsQuery::default())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["view"]["mode"], json!("clustered"));
        let rows = body["view"]["rows"].as_array().expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["count"], json!(1));
        assert_eq!(rows[1]["count"], json!(2));

        let raw = AlertsQuery {
            consolidate: Some("false".into()),
            ..AlertsQuery::default()
        };
        let (_, Json(body)) = list_alerts(State(state), Query(raw)).await;
        assert_eq!(body["view"]["mode"], json!("raw"));
        assert_eq!(body["view"]["rows"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn invalid_consolidate_flag_is_rejected() {
        let state = state_with_scans(&[]);
        let query = AlertsQuery {
            consolidate: Some("sometimes".into()),
            ..AlertsQuery::default()
        };
        let (status, _) = list_alerts(State(state), Query(query)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn archive_without_reason_is_bad_request() {
        let state = state_with_scans(&["2024-05-01T09:00:00Z"]);
        refresh_alerts(State(state.clone())).await;
        let request: ArchiveRequest = serde_json::from_value(json!({
            "target": { "kind": "alert", "ids": "suricata-bx5y1d" },
            "reason": "  "
        }))
        .expect("request");
        let (status, _) = archive_alerts(State(state), Json(request)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cluster_edit_reaches_every_member() {
        let state = state_with_scans(&["2024-05-01T09:00:00Z", "2024-05-01T09:01:30Z"]);
        refresh_alerts(State(state.clone())).await;

        let request: EditRequest = serde_json::from_value(json!({
            "target": { "kind": "cluster", "ids": ["suricata-bx5y1d", "suricata-bx5y1d-dup1"] },
            "classification": "Reconnaissance"
        }))
        .expect("request");
        let (status, _) = edit_alerts(State(state.clone()), Json(request)).await;
        assert_eq!(status, StatusCode::OK);

        let records = state.store.read_all().expect("records");
        assert_eq!(records.len(), 2);
        assert!(records
            .iter()
            .all(|r| r.payload.classification.as_deref() == Some("Reconnaissance")));
    }

    #[tokio::test]
    async fn exposes_feed_schemas() {
        let (status, Json(body)) = feed_schemas().await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.get("signature_event.v1").is_some());
    }
}
