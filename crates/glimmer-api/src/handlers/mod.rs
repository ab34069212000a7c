//! Route handlers.

pub mod cache;
pub mod jobs;
pub mod photos;
pub mod search;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::state::AppState;

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "workers_running": state.queue.is_running().await,
    }))
}
