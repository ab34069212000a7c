//! OpenAI backend tests against a local mock server.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use glimmer_core::{Error, GenerationBackend, GenerationRequest, OperationKind};
use glimmer_inference::{
    InvocationLimiter, OpenAIBackend, OpenAIConfig, RetryPolicy, RetryingInvoker,
};

fn backend_for(server: &MockServer) -> OpenAIBackend {
    OpenAIBackend::new(OpenAIConfig {
        base_url: format!("{}/v1", server.uri()),
        api_key: Some("test-key".to_string()),
        timeout_seconds: 5,
        ..Default::default()
    })
    .unwrap()
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

#[tokio::test]
async fn test_generate_returns_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("{\"ok\": true}")))
        .expect(1)
        .mount(&server)
        .await;

    let text = backend_for(&server)
        .generate(&GenerationRequest::new("hello"))
        .await
        .unwrap();
    assert_eq!(text, "{\"ok\": true}");
}

#[tokio::test]
async fn test_image_is_sent_as_data_uri() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("data:image/jpeg;base64,"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("{}")))
        .expect(1)
        .mount(&server)
        .await;

    backend_for(&server)
        .generate(&GenerationRequest::new("analyze").with_image("image/jpeg", vec![0xFF, 0xD8]))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_429_maps_to_rate_limited_with_header_hint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "3")
                .set_body_json(json!({
                    "error": {"message": "Too many requests", "type": "requests", "code": "rate_limit_exceeded"}
                })),
        )
        .mount(&server)
        .await;

    let err = backend_for(&server)
        .generate(&GenerationRequest::new("hello"))
        .await
        .unwrap_err();
    assert!(err.is_rate_limited());
    assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
}

#[tokio::test]
async fn test_429_hint_from_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "Rate limit reached. Please try again in 12s.", "type": "requests"}
        })))
        .mount(&server)
        .await;

    let err = backend_for(&server)
        .generate(&GenerationRequest::new("hello"))
        .await
        .unwrap_err();
    assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
}

#[tokio::test]
async fn test_server_error_is_inference_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = backend_for(&server)
        .generate(&GenerationRequest::new("hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Inference(_)));
    assert!(err.to_string().contains("bad gateway"));
}

#[tokio::test]
async fn test_empty_completion_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": null}, "finish_reason": "content_filter"}]
        })))
        .mount(&server)
        .await;

    let err = backend_for(&server)
        .generate(&GenerationRequest::new("hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Inference(_)));
}

#[tokio::test]
async fn test_invoker_recovers_from_transient_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            "```json\n{\"skin_type\": \"combination\", \"confidence\": 0.8}\n```",
        )))
        .mount(&server)
        .await;

    let invoker = RetryingInvoker::new(
        Arc::new(backend_for(&server)),
        Arc::new(InvocationLimiter::per_minute("test", 10)),
        RetryPolicy::default()
            .with_base_backoff(Duration::from_millis(10))
            .without_jitter(),
    );
    let inv = invoker
        .invoke(&OperationKind::SkinAnalysis, &GenerationRequest::new("analyze"))
        .await;

    assert_eq!(inv.attempts, 2);
    assert!(!inv.is_degraded());
    assert_eq!(inv.to_json()["skin_type"], "combination");
}

#[tokio::test]
async fn test_health_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&server)
        .await;

    assert!(backend_for(&server).health_check().await.unwrap());
}
