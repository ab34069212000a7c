//! Photo analysis handler: vision analysis of an uploaded face photo.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

use glimmer_cache::ResultCache;
use glimmer_core::{AnalysisSink, GenerationRequest, ObjectStore, OperationKind};
use glimmer_inference::RetryingInvoker;

use crate::handler::{JobContext, JobHandler, JobResult};

const SYSTEM_PROMPT: &str = "You are a cosmetic skin analyst. Describe only what is visible in \
the photo. Answer with a single JSON object inside a ```json block with the fields \
skin_tone (string), undertone (string), observations (array of strings), concerns (array of \
strings), and confidence (number between 0 and 1).";

/// Queue payload for a photo analysis job.
///
/// Carries the object-store key of the upload, never the image bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoAnalysisPayload {
    pub subject_id: String,
    pub photo_key: String,
    /// Overrides content sniffing when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Profile context passed to the model verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<JsonValue>,
}

impl PhotoAnalysisPayload {
    pub fn new(subject_id: impl Into<String>, photo_key: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            photo_key: photo_key.into(),
            mime_type: None,
            context: None,
        }
    }

    pub fn with_context(mut self, context: JsonValue) -> Self {
        self.context = Some(context);
        self
    }

    fn prompt(&self) -> String {
        match &self.context {
            Some(context) => format!(
                "Analyze the skin in this photo. Known profile: {}",
                context
            ),
            None => "Analyze the skin in this photo.".to_string(),
        }
    }
}

/// Fetches the photo, runs the vision model and stores the analysis.
pub struct PhotoAnalysisHandler {
    invoker: RetryingInvoker,
    objects: Arc<dyn ObjectStore>,
    sink: Arc<dyn AnalysisSink>,
    cache: ResultCache,
}

impl PhotoAnalysisHandler {
    pub fn new(
        invoker: RetryingInvoker,
        objects: Arc<dyn ObjectStore>,
        sink: Arc<dyn AnalysisSink>,
        cache: ResultCache,
    ) -> Self {
        Self {
            invoker,
            objects,
            sink,
            cache,
        }
    }

    async fn analyze(&self, payload: &PhotoAnalysisPayload) -> Result<JsonValue, JobResult> {
        let image = self
            .objects
            .fetch(&payload.photo_key)
            .await
            .map_err(|e| JobResult::from_error(&e))?;
        if image.is_empty() {
            return Err(JobResult::Retry(format!(
                "Photo {} is empty",
                payload.photo_key
            )));
        }

        let mime_type = match &payload.mime_type {
            Some(mime) => mime.clone(),
            None => match infer::get(&image) {
                Some(kind) if kind.matcher_type() == infer::MatcherType::Image => {
                    kind.mime_type().to_string()
                }
                _ => {
                    return Err(JobResult::Retry(format!(
                        "Photo {} is not a recognised image",
                        payload.photo_key
                    )))
                }
            },
        };

        let request = GenerationRequest::new(payload.prompt())
            .with_system(SYSTEM_PROMPT)
            .with_image(mime_type, image);

        let invocation = self
            .invoker
            .try_invoke(&OperationKind::PhotoAnalysis, &request)
            .await
            .map_err(|failure| JobResult::from_error(&failure.error))?;

        let mut analysis = invocation.into_json();
        if let Some(obj) = analysis.as_object_mut() {
            obj.insert("photo_key".to_string(), json!(payload.photo_key));
        }
        Ok(analysis)
    }
}

#[async_trait]
impl JobHandler for PhotoAnalysisHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::PhotoAnalysis
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let payload: PhotoAnalysisPayload = match serde_json::from_value(ctx.payload().clone()) {
            Ok(payload) => payload,
            Err(e) => return JobResult::Failed(format!("Invalid photo analysis payload: {}", e)),
        };

        let analysis = match self.analyze(&payload).await {
            Ok(analysis) => analysis,
            Err(result) => return result,
        };

        let kind = OperationKind::PhotoAnalysis;
        if let Err(e) = self
            .sink
            .upsert_analysis(&payload.subject_id, &payload.photo_key, &kind, &analysis)
            .await
        {
            return JobResult::from_error(&e);
        }

        // Cached results derived from the old profile are now stale.
        match self.cache.invalidate(&payload.subject_id, None).await {
            Ok(removed) => info!(
                subsystem = "jobs",
                component = "photo_analysis",
                job_id = %ctx.job_id(),
                subject_id = %payload.subject_id,
                invalidated = removed,
                "Photo analysis stored"
            ),
            Err(e) => warn!(
                subsystem = "jobs",
                component = "photo_analysis",
                job_id = %ctx.job_id(),
                subject_id = %payload.subject_id,
                error = %e,
                "Photo analysis stored, cache invalidation failed"
            ),
        }

        JobResult::Success(Some(json!({
            "subject_id": payload.subject_id,
            "photo_key": payload.photo_key,
            "confidence": analysis.get("confidence").cloned().unwrap_or(JsonValue::Null),
        })))
    }
}
