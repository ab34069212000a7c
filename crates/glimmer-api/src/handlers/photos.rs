//! Photo upload and analysis enqueue.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;
use uuid::Uuid;

use glimmer_core::{Error, JobState, OperationKind};
use glimmer_jobs::{JobOptions, PhotoAnalysisPayload};

use crate::error::ApiError;
use crate::state::AppState;

const MAX_SUBJECT_ID_LEN: usize = 128;

#[derive(Debug, Deserialize)]
pub struct AnalyzePhotoBody {
    pub subject_id: String,
    /// Standard base64 of the image file.
    pub image_base64: String,
    /// Profile context forwarded to the model.
    #[serde(default)]
    pub context: Option<JsonValue>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzePhotoResponse {
    pub job_id: Uuid,
    pub state: JobState,
    pub photo_key: String,
}

/// Subject ids become path segments in object keys.
fn validate_subject_id(subject_id: &str) -> Result<(), ApiError> {
    let valid = !subject_id.is_empty()
        && subject_id.len() <= MAX_SUBJECT_ID_LEN
        && subject_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ApiError::BadRequest(
            "subject_id must be 1-128 characters of [A-Za-z0-9_-]".to_string(),
        ))
    }
}

/// Store the upload, then enqueue its analysis. Answers 202 with the job id.
pub async fn analyze_photo(
    State(state): State<AppState>,
    Json(body): Json<AnalyzePhotoBody>,
) -> Result<(StatusCode, Json<AnalyzePhotoResponse>), ApiError> {
    validate_subject_id(&body.subject_id)?;

    let image = base64::engine::general_purpose::STANDARD
        .decode(body.image_base64.trim())
        .map_err(|e| ApiError::BadRequest(format!("image_base64 is not valid base64: {}", e)))?;
    if image.is_empty() {
        return Err(ApiError::BadRequest("Image is empty".to_string()));
    }
    let extension = match infer::get(&image) {
        Some(kind) if kind.matcher_type() == infer::MatcherType::Image => kind.extension(),
        _ => {
            return Err(ApiError::BadRequest(
                "Upload is not a recognised image".to_string(),
            ))
        }
    };

    let photo_key = format!(
        "photos/{}/{}.{}",
        body.subject_id,
        Uuid::now_v7(),
        extension
    );
    state.photos.put(&photo_key, &image).await?;

    let mut payload = PhotoAnalysisPayload::new(&body.subject_id, &photo_key);
    if let Some(context) = body.context {
        payload = payload.with_context(context);
    }
    let handle = state
        .queue
        .enqueue(
            OperationKind::PhotoAnalysis,
            serde_json::to_value(&payload).map_err(Error::from)?,
            JobOptions::default(),
        )
        .await?;

    info!(
        subsystem = "api",
        op = "analyze_photo",
        subject_id = %body.subject_id,
        job_id = %handle.id,
        photo_key = %photo_key,
        size = image.len(),
        "Photo accepted for analysis"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(AnalyzePhotoResponse {
            job_id: handle.id,
            state: handle.state,
            photo_key,
        }),
    ))
}
