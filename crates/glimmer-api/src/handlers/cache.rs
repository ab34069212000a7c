//! Result cache statistics and invalidation.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::info;

use glimmer_cache::CacheStats;
use glimmer_core::OperationKind;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct InvalidateParams {
    /// Restrict invalidation to one operation kind.
    pub kind: Option<String>,
}

pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats())
}

/// Drop a subject's cached results, e.g. after their profile changed.
pub async fn invalidate_subject(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
    Query(params): Query<InvalidateParams>,
) -> Result<Json<JsonValue>, ApiError> {
    let kind = params.kind.as_deref().map(OperationKind::parse);
    let removed = state.cache.invalidate(&subject_id, kind.as_ref()).await?;
    info!(
        subsystem = "api",
        op = "invalidate_subject",
        subject_id = %subject_id,
        operation_kind = kind.as_ref().map(|k| k.as_str()).unwrap_or("*"),
        removed,
        "Cache invalidated"
    );
    Ok(Json(json!({ "removed": removed })))
}
