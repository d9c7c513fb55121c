use axum::{http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;
use triage_core::config::TriageConfig;
use triage_core::dashboard::Dashboard;
use triage_core::error::TriageError;
use triage_core::feeds::BufferedFeed;
use triage_core::metadata_store::{InMemoryMetadataStore, MetadataStore, SqliteMetadataStore};

#[derive(Clone)]
pub struct AppState {
    pub dashboard: Arc<Dashboard>,
    pub feed: Arc<BufferedFeed>,
    pub store: Arc<dyn MetadataStore>,
    pub sensor_stale_after: chrono::Duration,
}

pub fn build_state(config: &TriageConfig) -> Result<AppState, TriageError> {
    let store: Arc<dyn MetadataStore> = match &config.db_path {
        Some(path) => Arc::new(SqliteMetadataStore::open(path)?),
        None => {
            tracing::warn!("no database configured, analyst metadata is kept in memory");
            Arc::new(InMemoryMetadataStore::new())
        }
    };
    let feed = Arc::new(BufferedFeed::default());
    let dashboard = Arc::new(Dashboard::new(
        feed.clone(),
        store.clone(),
        config.cycle_options(),
        config.consolidation,
    ));
    Ok(AppState {
        dashboard,
        feed,
        store,
        sensor_stale_after: config.sensor_stale_after,
    })
}

pub type ApiReply = (StatusCode, Json<Value>);

/// Runs store-touching work on the blocking pool. The outer error is only a
/// panicked or cancelled task.
pub async fn run_blocking<R, F>(job: F) -> Result<R, TriageError>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|err| TriageError::Fetch(format!("blocking task failed: {err}")))
}

pub fn error_status(err: &TriageError) -> StatusCode {
    match err {
        TriageError::Validation(_) => StatusCode::BAD_REQUEST,
        TriageError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        TriageError::Fetch(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub fn error_reply(err: &TriageError) -> ApiReply {
    (
        error_status(err),
        Json(json!({ "success": false, "error": err.to_string() })),
    )
}
