//! OpenAI-compatible generation backend implementation.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

use glimmer_core::{defaults, Error, GenerationBackend, GenerationRequest, Result};

use super::error::{retry_after_header, to_glimmer_error, OpenAIErrorCode};
use super::types::*;

/// Configuration for OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// Base URL for the API endpoint.
    pub base_url: String,
    /// API key for authentication (optional for local endpoints).
    pub api_key: Option<String>,
    /// Model for text-only requests.
    pub gen_model: String,
    /// Model for requests carrying images.
    pub vision_model: String,
    /// Sampling temperature; provider default when unset.
    pub temperature: Option<f32>,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    /// Skip TLS verification (for self-signed certs in local environments).
    pub skip_tls_verify: bool,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::OPENAI_URL.to_string(),
            api_key: None,
            gen_model: defaults::GEN_MODEL.to_string(),
            vision_model: defaults::VISION_MODEL.to_string(),
            temperature: None,
            timeout_seconds: defaults::GEN_TIMEOUT_SECS,
            skip_tls_verify: false,
        }
    }
}

impl OpenAIConfig {
    /// Load from `OPENAI_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| defaults::OPENAI_URL.to_string()),
            api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            gen_model: std::env::var("OPENAI_GEN_MODEL")
                .unwrap_or_else(|_| defaults::GEN_MODEL.to_string()),
            vision_model: std::env::var("OPENAI_VISION_MODEL")
                .unwrap_or_else(|_| defaults::VISION_MODEL.to_string()),
            temperature: std::env::var("OPENAI_TEMPERATURE")
                .ok()
                .and_then(|s| s.parse().ok()),
            timeout_seconds: glimmer_core::env_or("OPENAI_TIMEOUT", defaults::GEN_TIMEOUT_SECS),
            skip_tls_verify: std::env::var("OPENAI_SKIP_TLS_VERIFY")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(false),
        }
    }
}

/// OpenAI-compatible chat completions backend.
pub struct OpenAIBackend {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIBackend {
    /// Create a new OpenAI backend with the given configuration.
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        let mut client_builder =
            Client::builder().timeout(Duration::from_secs(config.timeout_seconds));

        if config.skip_tls_verify {
            client_builder = client_builder.danger_accept_invalid_certs(true);
        }

        let client = client_builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "openai",
            url = %config.base_url,
            model = %config.gen_model,
            vision_model = %config.vision_model,
            "Initializing OpenAI backend"
        );

        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(OpenAIConfig::from_env())
    }

    /// Get the current configuration.
    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key {
            Some(ref api_key) => req.bearer_auth(api_key),
            None => req,
        }
    }

    fn build_messages(request: &GenerationRequest) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);

        if let Some(system) = request.system.as_deref().filter(|s| !s.is_empty()) {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: MessageContent::Text(system.to_string()),
            });
        }

        let content = if request.has_images() {
            let mut parts = vec![ContentPart::Text {
                text: request.prompt.clone(),
            }];
            for image in &request.images {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&image.data);
                parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:{};base64,{}", image.mime_type, encoded),
                    },
                });
            }
            MessageContent::Parts(parts)
        } else {
            MessageContent::Text(request.prompt.clone())
        };

        messages.push(ChatMessage {
            role: "user".to_string(),
            content,
        });
        messages
    }

    async fn error_from_response(response: reqwest::Response) -> Error {
        let status = response.status();
        let retry_after = retry_after_header(response.headers());
        let body = response.text().await.unwrap_or_default();

        let (message, error_type) = match serde_json::from_str::<OpenAIErrorResponse>(&body) {
            Ok(parsed) => (
                parsed.error.message,
                parsed
                    .error
                    .code
                    .as_ref()
                    .and_then(|c| c.as_str().map(str::to_string))
                    .or(parsed.error.error_type)
                    .unwrap_or_default(),
            ),
            Err(_) if body.is_empty() => (status.to_string(), String::new()),
            Err(_) => (body, String::new()),
        };

        let code = OpenAIErrorCode::from_response(status.as_u16(), &error_type);
        warn!(
            subsystem = "inference",
            component = "openai",
            status = status.as_u16(),
            retryable = code.is_retryable(),
            retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
            error = %message,
            "OpenAI request failed"
        );
        to_glimmer_error(code, &message, retry_after)
    }
}

#[async_trait]
impl GenerationBackend for OpenAIBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let model = if request.has_images() {
            &self.config.vision_model
        } else {
            &self.config.gen_model
        };
        debug!(
            subsystem = "inference",
            component = "openai",
            model = %model,
            prompt_len = request.prompt.len(),
            images = request.images.len(),
            "Generating"
        );

        let body = ChatCompletionRequest {
            model: model.clone(),
            messages: Self::build_messages(request),
            temperature: self.config.temperature,
            max_tokens: None,
            stream: false,
        };

        let response = self
            .authorize(self.client.post(self.url("/chat/completions")))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("OpenAI request timed out: {}", e))
                } else {
                    Error::Inference(format!("Request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let result: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Failed to parse response: {}", e)))?;

        let content = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::Inference("Empty completion".to_string()))?;

        debug!(
            subsystem = "inference",
            component = "openai",
            response_len = content.len(),
            "Generation complete"
        );
        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.config.gen_model
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .authorize(self.client.get(self.url("/models")))
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => Ok(true),
            Ok(resp) => {
                warn!(status = resp.status().as_u16(), "OpenAI health check failed");
                Ok(false)
            }
            Err(e) => {
                warn!(error = %e, "OpenAI health check error");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OpenAIConfig::default();
        assert_eq!(config.base_url, defaults::OPENAI_URL);
        assert_eq!(config.gen_model, defaults::GEN_MODEL);
        assert_eq!(config.timeout_seconds, defaults::GEN_TIMEOUT_SECS);
        assert!(config.api_key.is_none());
        assert!(!config.skip_tls_verify);
    }

    #[test]
    fn test_text_request_uses_plain_content() {
        let request = GenerationRequest::new("Hello").with_system("Be brief");
        let messages = OpenAIBackend::build_messages(&request);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(
            messages[1].content,
            MessageContent::Text("Hello".to_string())
        );
    }

    #[test]
    fn test_empty_system_is_skipped() {
        let request = GenerationRequest::new("Hello").with_system("");
        assert_eq!(OpenAIBackend::build_messages(&request).len(), 1);
    }

    #[test]
    fn test_image_request_uses_data_uri() {
        let request = GenerationRequest::new("Analyze").with_image("image/png", vec![1, 2, 3]);
        let messages = OpenAIBackend::build_messages(&request);
        match &messages[0].content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                match &parts[1] {
                    ContentPart::ImageUrl { image_url } => {
                        assert_eq!(image_url.url, "data:image/png;base64,AQID");
                    }
                    other => panic!("expected image part, got {:?}", other),
                }
            }
            other => panic!("expected parts, got {:?}", other),
        }
    }

    #[test]
    fn test_backend_creation() {
        let backend = OpenAIBackend::new(OpenAIConfig::default()).unwrap();
        assert_eq!(backend.model_name(), defaults::GEN_MODEL);
        assert_eq!(backend.url("/models"), "https://api.openai.com/v1/models");
    }
}
