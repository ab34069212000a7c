//! Concurrency tests for the result cache.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use glimmer_cache::{ResultCache, TtlTable};
use glimmer_core::{GenerationRequest, OperationKind};
use glimmer_db::memory::MemoryCacheStore;
use glimmer_inference::mock::ScriptedBackend;
use glimmer_inference::{InvocationLimiter, RetryPolicy, RetryingInvoker};

#[tokio::test(start_paused = true)]
async fn test_concurrent_identical_requests_generate_once() {
    let cache = ResultCache::new(Arc::new(MemoryCacheStore::new()), TtlTable::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let input = json!({"answers": {"oiliness": 4}});

    let request = |calls: Arc<AtomicUsize>| {
        let cache = cache.clone();
        let input = input.clone();
        async move {
            cache
                .get_or_generate("u1", &OperationKind::SkinAnalysis, &input, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Ok(json!({"skin_type": "combination"}))
                })
                .await
                .unwrap()
        }
    };

    let (a, b) = tokio::join!(request(calls.clone()), request(calls.clone()));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(a.payload, b.payload);
    assert_ne!(a.from_cache, b.from_cache);
    assert_eq!(cache.stats().coalesced, 1);
}

#[tokio::test(start_paused = true)]
async fn test_many_concurrent_requests_share_one_generation() {
    let cache = ResultCache::new(Arc::new(MemoryCacheStore::new()), TtlTable::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let calls = calls.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_or_generate("u1", &OperationKind::RoutineGeneration, &json!({}), || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(json!({"morning": ["cleanser"]}))
                })
                .await
                .unwrap()
        }));
    }

    for result in futures::future::join_all(handles).await {
        assert_eq!(result.unwrap().payload["morning"][0], "cleanser");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_different_subjects_do_not_coalesce() {
    let cache = ResultCache::new(Arc::new(MemoryCacheStore::new()), TtlTable::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let request = |subject: &'static str| {
        let cache = cache.clone();
        let calls = calls.clone();
        async move {
            cache
                .get_or_generate(subject, &OperationKind::SkinAnalysis, &json!({}), || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok(json!({"subject": subject}))
                })
                .await
                .unwrap()
        }
    };

    let (a, b) = tokio::join!(request("u1"), request("u2"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(a.payload["subject"], "u1");
    assert_eq!(b.payload["subject"], "u2");
}

#[tokio::test(start_paused = true)]
async fn test_fallback_from_invoker_is_not_cached() {
    let backend = ScriptedBackend::new().otherwise_fail("provider down");
    let invoker = RetryingInvoker::new(
        Arc::new(backend.clone()),
        Arc::new(InvocationLimiter::per_minute("test", 100)),
        RetryPolicy::default()
            .with_max_attempts(2)
            .with_base_backoff(Duration::from_millis(10))
            .without_jitter(),
    );
    let store = Arc::new(MemoryCacheStore::new());
    let cache = ResultCache::new(store.clone(), TtlTable::default());
    let kind = OperationKind::SkinAnalysis;
    let request = GenerationRequest::new("analyze");

    for _ in 0..2 {
        let lookup = cache
            .get_or_generate("u1", &kind, &json!({"a": 1}), || async {
                Ok(invoker.invoke(&kind, &request).await.into_json())
            })
            .await
            .unwrap();
        assert!(!lookup.from_cache);
        assert_eq!(lookup.payload["fallback"], true);
    }
    assert_eq!(store.len(), 0);
    assert_eq!(backend.calls(), 4);
}
