//! HTTP routes against in-memory stores and a scripted model.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::Engine;
use serde_json::{json, Value as JsonValue};
use tempfile::TempDir;
use tower::ServiceExt;

use glimmer_api::{router, AppState, ServerConfig};
use glimmer_cache::{ResultCache, TtlTable};
use glimmer_core::OperationKind;
use glimmer_db::memory::{MemoryAnalysisSink, MemoryCacheStore, MemoryJobStore, RecordingQueryExecutor};
use glimmer_db::FilesystemObjectStore;
use glimmer_inference::mock::ScriptedBackend;
use glimmer_inference::{InvocationLimiter, RetryPolicy, RetryingInvoker};
use glimmer_jobs::{JobQueue, PhotoAnalysisHandler, WorkerConfig};
use glimmer_search::{SchemaAllowlist, SearchConfig, SearchService};

const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR\x00\x00\x00\x01\x00\x00\x00\x01";

struct TestApp {
    router: Router,
    backend: ScriptedBackend,
    executor: Arc<RecordingQueryExecutor>,
    queue: Arc<JobQueue>,
    sink: Arc<MemoryAnalysisSink>,
    cache: ResultCache,
    dir: TempDir,
}

async fn app(backend: ScriptedBackend) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let invoker = RetryingInvoker::new(
        Arc::new(backend.clone()),
        Arc::new(InvocationLimiter::per_minute("test", 1_000)),
        RetryPolicy::default().with_max_attempts(1).without_jitter(),
    );
    let executor = Arc::new(RecordingQueryExecutor::new().with_rows(vec![json!({"name": "Gel Cleanser"})]));
    let cache = ResultCache::new(Arc::new(MemoryCacheStore::new()), TtlTable::default());
    let photos = Arc::new(FilesystemObjectStore::new(dir.path()));
    let sink = Arc::new(MemoryAnalysisSink::new());

    let queue = Arc::new(JobQueue::new(
        Arc::new(MemoryJobStore::new()),
        WorkerConfig::default()
            .with_rate_per_minute(1_000)
            .with_poll_interval(Duration::from_millis(10)),
    ));
    queue
        .register_handler(PhotoAnalysisHandler::new(
            invoker.clone(),
            photos.clone(),
            sink.clone(),
            cache.clone(),
        ))
        .await;

    let search = SearchService::new(
        invoker,
        executor.clone(),
        Arc::new(SchemaAllowlist::catalog()),
        SearchConfig::default(),
    );
    let state = AppState::new(search, queue.clone(), photos, cache.clone());

    TestApp {
        router: router(state, &ServerConfig::default()),
        backend,
        executor,
        queue,
        sink,
        cache,
        dir,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, JsonValue) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: JsonValue) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn photo_body(subject_id: &str, bytes: &[u8]) -> JsonValue {
    json!({
        "subject_id": subject_id,
        "image_base64": base64::engine::general_purpose::STANDARD.encode(bytes),
        "context": {"skin_type": "oily"}
    })
}

#[tokio::test]
async fn test_health() {
    let app = app(ScriptedBackend::new()).await;
    let (status, body) = send(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["workers_running"], false);
}

#[tokio::test]
async fn test_search_runs_validated_query() {
    let backend = ScriptedBackend::new().then_reply(
        "```sql\nSELECT p.name FROM products p WHERE p.price < 20\n```\n```json\n{\"confidence\": 0.85}\n```",
    );
    let app = app(backend).await;

    let (status, body) = send(
        &app.router,
        post_json("/api/v1/search", json!({"query": "cheap cleanser"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "generated");
    assert_eq!(body["rows"], json!([{"name": "Gel Cleanser"}]));
    assert!(body["sql"].as_str().unwrap().ends_with("LIMIT 50"));
    assert_eq!(app.executor.statements().len(), 1);
}

#[tokio::test]
async fn test_search_injection_gets_fallback_listing() {
    let backend = ScriptedBackend::new().then_reply(
        "```sql\nSELECT name FROM products; DROP TABLE products\n```\n```json\n{\"confidence\": 0.99}\n```",
    );
    let app = app(backend).await;

    let (status, body) = send(
        &app.router,
        post_json("/api/v1/search", json!({"query": "'; DROP TABLE products; --"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "fallback");
    assert_eq!(body["fallback_reason"]["kind"], "rejected");
    assert_eq!(body["fallback_reason"]["rule"], "forbidden_construct");
    assert!(app
        .executor
        .statements()
        .iter()
        .all(|sql| !sql.contains("DROP")));

    let (_, stats) = send(&app.router, get("/api/v1/search/stats")).await;
    assert_eq!(stats["searches"], 1);
    assert_eq!(stats["rejected"], 1);
}

#[tokio::test]
async fn test_photo_upload_enqueues_analysis() {
    let app = app(ScriptedBackend::new()).await;

    let (status, body) = send(
        &app.router,
        post_json("/api/v1/photos/analyze", photo_body("user-1", PNG_BYTES)),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["state"], "waiting");
    let photo_key = body["photo_key"].as_str().unwrap();
    assert!(photo_key.starts_with("photos/user-1/"));
    assert!(photo_key.ends_with(".png"));
    assert_eq!(std::fs::read(app.dir.path().join(photo_key)).unwrap(), PNG_BYTES);

    let job_id = body["job_id"].as_str().unwrap();
    let (status, job) = send(&app.router, get(&format!("/api/v1/jobs/{}", job_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["kind"], "photo_analysis");
    assert_eq!(job["state"], "waiting");
    assert_eq!(job["payload"]["photo_key"], photo_key);
    assert_eq!(job["payload"]["context"]["skin_type"], "oily");

    let (_, metrics) = send(&app.router, get("/api/v1/jobs/metrics")).await;
    assert_eq!(metrics["waiting"], 1);
    assert_eq!(app.backend.calls(), 0);
}

#[tokio::test]
async fn test_photo_upload_rejects_bad_input() {
    let app = app(ScriptedBackend::new()).await;

    let (status, body) = send(
        &app.router,
        post_json("/api/v1/photos/analyze", photo_body("user-1", b"just some text")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("not a recognised image"));

    let (status, _) = send(
        &app.router,
        post_json("/api/v1/photos/analyze", photo_body("../escape", PNG_BYTES)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app.router,
        post_json(
            "/api/v1/photos/analyze",
            json!({"subject_id": "user-1", "image_base64": "%%% not base64"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, metrics) = send(&app.router, get("/api/v1/jobs/metrics")).await;
    assert_eq!(metrics["waiting"], 0);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let app = app(ScriptedBackend::new()).await;
    let (status, body) = send(
        &app.router,
        get("/api/v1/jobs/0190a5e4-3f1c-7a10-8000-000000000000"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn test_uploaded_photo_is_analyzed_by_workers() {
    let backend = ScriptedBackend::new()
        .otherwise_reply(r#"{"skin_type": "combination", "concerns": ["redness"]}"#);
    let app = app(backend).await;
    app.queue.start().await.unwrap();

    let (_, body) = send(
        &app.router,
        post_json("/api/v1/photos/analyze", photo_body("user-7", PNG_BYTES)),
    )
    .await;
    let job_uri = format!("/api/v1/jobs/{}", body["job_id"].as_str().unwrap());
    let photo_key = body["photo_key"].as_str().unwrap().to_string();

    let mut state = JsonValue::Null;
    for _ in 0..200 {
        let (_, job) = send(&app.router, get(&job_uri)).await;
        state = job["state"].clone();
        if state == "completed" || state == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state, "completed");

    let analysis = app
        .sink
        .get("user-7", &photo_key, &OperationKind::PhotoAnalysis)
        .unwrap();
    assert_eq!(analysis["skin_type"], "combination");
    assert_eq!(app.backend.calls(), 1);

    app.queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cache_invalidation_by_subject() {
    let app = app(ScriptedBackend::new()).await;
    for subject in ["user-1", "user-1", "user-2"] {
        let input = json!({ "subject": subject, "n": app.cache.stats().generations });
        app.cache
            .get_or_generate(subject, &OperationKind::SkinAnalysis, &input, || async {
                Ok::<_, glimmer_core::Error>(json!({"skin_type": "dry"}))
            })
            .await
            .unwrap();
    }

    let request = Request::delete("/api/v1/cache/subjects/user-1?kind=skin_analysis")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 2);

    let (_, stats) = send(&app.router, get("/api/v1/cache/stats")).await;
    assert_eq!(stats["generations"], 3);
}
