pub mod alerts_api;
pub mod health_api;
pub mod logging;
pub mod metadata_api;
pub mod state;
pub mod webhook;

use axum::Router;
use state::AppState;

pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(webhook::webhook_router())
        .merge(metadata_api::metadata_router())
        .merge(alerts_api::alerts_router())
        .merge(health_api::health_router())
        .with_state(state)
}
