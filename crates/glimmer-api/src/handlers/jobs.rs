//! Job status and queue metrics.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use glimmer_core::{Error, JobCounts};

use crate::error::ApiError;
use crate::state::AppState;

/// The job record, with `state` reporting a due delayed job as `waiting`.
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    let job = state
        .queue
        .job(id)
        .await?
        .ok_or(Error::JobNotFound(id))?;
    let current = state.queue.status(id).await?.unwrap_or(job.state);

    let mut body = serde_json::to_value(&job).map_err(Error::from)?;
    body["state"] = json!(current);
    Ok(Json(body))
}

pub async fn job_metrics(State(state): State<AppState>) -> Result<Json<JobCounts>, ApiError> {
    Ok(Json(state.queue.metrics().await?))
}
