//! Subject-partitioned result cache over a [`CacheStore`].
//!
//! Lookups are keyed by `(subject, kind, canonical input)`. A miss runs the
//! caller's generator once and persists the result with the kind's TTL.
//! Concurrent misses for the same key share one generation.
//!
//! The cache never makes a request fail: store errors are logged, counted,
//! and treated as a miss.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use glimmer_core::{
    defaults, is_degraded, CacheEntry, CacheStore, Clock, OperationKind, Result, SystemClock,
};

use crate::canonical::cache_key;
use crate::ttl::TtlTable;

/// Result of [`ResultCache::get_or_generate`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup {
    pub payload: JsonValue,
    /// True when this caller's generator did not run.
    pub from_cache: bool,
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Generator runs.
    pub generations: u64,
    /// Callers served by another caller's in-flight generation.
    pub coalesced: u64,
    /// Degraded payloads returned without being stored.
    pub uncached_degraded: u64,
    /// Backing store failures.
    pub store_errors: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    generations: AtomicU64,
    coalesced: AtomicU64,
    uncached_degraded: AtomicU64,
    store_errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            generations: self.generations.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            uncached_degraded: self.uncached_degraded.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }
}

type InFlight = Arc<OnceCell<JsonValue>>;

/// Result cache shared across request handlers and workers.
#[derive(Clone)]
pub struct ResultCache {
    inner: Arc<ResultCacheInner>,
}

struct ResultCacheInner {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    ttl: TtlTable,
    in_flight: Mutex<HashMap<String, InFlight>>,
    counters: Counters,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: TtlTable) -> Self {
        Self::with_clock(store, ttl, Arc::new(SystemClock))
    }

    /// Cache with TTLs from the environment.
    pub fn from_env(store: Arc<dyn CacheStore>) -> Self {
        Self::new(store, TtlTable::from_env())
    }

    pub fn with_clock(store: Arc<dyn CacheStore>, ttl: TtlTable, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(ResultCacheInner {
                store,
                clock,
                ttl,
                in_flight: Mutex::new(HashMap::new()),
                counters: Counters::default(),
            }),
        }
    }

    pub fn ttl_table(&self) -> &TtlTable {
        &self.inner.ttl
    }

    /// Key under which `(subject, kind, input)` is stored.
    pub fn key_for(&self, subject_id: &str, kind: &OperationKind, input: &JsonValue) -> String {
        cache_key(subject_id, kind, input)
    }

    /// Return the cached payload, or run `generate` and cache its result.
    ///
    /// Errors come only from `generate`. Degraded (fallback) payloads are
    /// returned but not stored.
    pub async fn get_or_generate<F, Fut>(
        &self,
        subject_id: &str,
        kind: &OperationKind,
        input: &JsonValue,
        generate: F,
    ) -> Result<CacheLookup>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<JsonValue>>,
    {
        let key = cache_key(subject_id, kind, input);

        if let Some(payload) = self.lookup(&key, subject_id, kind).await {
            return Ok(CacheLookup {
                payload,
                from_cache: true,
            });
        }
        Counters::bump(&self.inner.counters.misses);

        let cell = self.join_in_flight(&key);
        let mut ran_generator = false;
        let outcome: Result<JsonValue> = cell
            .get_or_try_init(|| async {
                // Another caller may have stored the entry between our
                // lookup and joining the in-flight slot.
                if let Some(payload) = self.lookup(&key, subject_id, kind).await {
                    return Ok(payload);
                }
                ran_generator = true;
                Counters::bump(&self.inner.counters.generations);
                let payload = generate().await?;
                self.persist(&key, subject_id, kind, &payload).await;
                Ok(payload)
            })
            .await
            .cloned();
        self.leave_in_flight(&key, &cell);

        let payload = outcome?;
        if !ran_generator {
            Counters::bump(&self.inner.counters.coalesced);
            debug!(
                subsystem = "cache",
                component = "result_cache",
                operation_kind = %kind,
                cache_key = %key,
                "Served by in-flight generation"
            );
        }
        Ok(CacheLookup {
            payload,
            from_cache: !ran_generator,
        })
    }

    async fn lookup(&self, key: &str, subject_id: &str, kind: &OperationKind) -> Option<JsonValue> {
        let now = self.inner.clock.now();
        match self.inner.store.get(key, subject_id, now).await {
            Ok(Some(entry)) => {
                Counters::bump(&self.inner.counters.hits);
                debug!(
                    subsystem = "cache",
                    component = "result_cache",
                    operation_kind = %kind,
                    subject_id = %subject_id,
                    cache_key = %key,
                    access_count = entry.access_count,
                    "Cache hit"
                );
                Some(entry.payload)
            }
            Ok(None) => None,
            Err(e) => {
                Counters::bump(&self.inner.counters.store_errors);
                warn!(
                    subsystem = "cache",
                    component = "result_cache",
                    operation_kind = %kind,
                    cache_key = %key,
                    degraded = true,
                    error = %e,
                    "Cache lookup failed, treating as miss"
                );
                None
            }
        }
    }

    async fn persist(&self, key: &str, subject_id: &str, kind: &OperationKind, payload: &JsonValue) {
        if is_degraded(payload) {
            Counters::bump(&self.inner.counters.uncached_degraded);
            debug!(
                subsystem = "cache",
                component = "result_cache",
                operation_kind = %kind,
                cache_key = %key,
                "Not caching degraded payload"
            );
            return;
        }

        let now = self.inner.clock.now();
        let entry = CacheEntry {
            key: key.to_string(),
            subject_id: subject_id.to_string(),
            operation_kind: kind.clone(),
            payload: payload.clone(),
            created_at: now,
            expires_at: expiry(now, self.inner.ttl.ttl_for(kind)),
            access_count: 1,
            last_accessed_at: Some(now),
        };

        if let Err(e) = self.inner.store.upsert(entry).await {
            Counters::bump(&self.inner.counters.store_errors);
            warn!(
                subsystem = "cache",
                component = "result_cache",
                operation_kind = %kind,
                cache_key = %key,
                degraded = true,
                error = %e,
                "Failed to store generated result"
            );
        }
    }

    fn join_in_flight(&self, key: &str) -> InFlight {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        in_flight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    fn leave_in_flight(&self, key: &str, cell: &InFlight) {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if in_flight
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, cell))
        {
            in_flight.remove(key);
        }
    }

    /// Delete the subject's entries, optionally only those of `kind`.
    pub async fn invalidate(&self, subject_id: &str, kind: Option<&OperationKind>) -> Result<u64> {
        let removed = self.inner.store.delete_for_subject(subject_id, kind).await?;
        info!(
            subsystem = "cache",
            component = "result_cache",
            op = "invalidate",
            subject_id = %subject_id,
            operation_kind = kind.map(OperationKind::as_str).unwrap_or("*"),
            result_count = removed,
            "Invalidated cache entries"
        );
        Ok(removed)
    }

    /// Physically remove expired entries.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let removed = self
            .inner
            .store
            .delete_expired(self.inner.clock.now())
            .await?;
        if removed > 0 {
            info!(
                subsystem = "cache",
                component = "result_cache",
                op = "sweep",
                result_count = removed,
                "Swept expired cache entries"
            );
        }
        Ok(removed)
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `interval` until the
    /// returned handle is aborted.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = cache.sweep_expired().await {
                    Counters::bump(&cache.inner.counters.store_errors);
                    warn!(
                        subsystem = "cache",
                        component = "result_cache",
                        op = "sweep",
                        error = %e,
                        "Expiry sweep failed"
                    );
                }
            }
        })
    }

    /// Sweep interval from `CACHE_SWEEP_INTERVAL_SECS`.
    pub fn sweep_interval_from_env() -> Duration {
        Duration::from_secs(glimmer_core::env_or(
            "CACHE_SWEEP_INTERVAL_SECS",
            defaults::CACHE_SWEEP_INTERVAL_SECS,
        ))
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.counters.snapshot()
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use glimmer_core::{Error, ManualClock};
    use glimmer_db::memory::MemoryCacheStore;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn cache_with_clock() -> (ResultCache, Arc<MemoryCacheStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryCacheStore::new());
        let clock = Arc::new(ManualClock::default());
        let cache = ResultCache::with_clock(store.clone(), TtlTable::default(), clock.clone());
        (cache, store, clock)
    }

    #[tokio::test]
    async fn test_second_request_is_served_from_cache() {
        let (cache, _store, _clock) = cache_with_clock();
        let calls = AtomicUsize::new(0);
        let input = json!({"answers": [1, 2, 3]});

        for expected_from_cache in [false, true] {
            let lookup = cache
                .get_or_generate("u1", &OperationKind::SkinAnalysis, &input, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"skin_type": "oily"}))
                })
                .await
                .unwrap();
            assert_eq!(lookup.payload, json!({"skin_type": "oily"}));
            assert_eq!(lookup.from_cache, expected_from_cache);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.generations, 1);
    }

    #[tokio::test]
    async fn test_hit_updates_access_metadata() {
        let (cache, store, _clock) = cache_with_clock();
        let input = json!({"q": 1});
        for _ in 0..3 {
            cache
                .get_or_generate("u1", &OperationKind::SkinAnalysis, &input, || async {
                    Ok(json!({"ok": true}))
                })
                .await
                .unwrap();
        }
        let key = cache.key_for("u1", &OperationKind::SkinAnalysis, &input);
        let entry = store.entry(&key).unwrap();
        assert_eq!(entry.access_count, 3);
        assert!(entry.last_accessed_at.is_some());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss_before_sweep() {
        let (cache, store, clock) = cache_with_clock();
        let kind = OperationKind::QueryGeneration;
        let input = json!({"q": "serum"});
        let calls = AtomicUsize::new(0);
        let gen = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"sql": "SELECT 1"}))
        };

        cache.get_or_generate("u1", &kind, &input, gen).await.unwrap();
        clock.advance(chrono::Duration::minutes(16));
        assert_eq!(store.len(), 1);

        let lookup = cache.get_or_generate("u1", &kind, &input, gen).await.unwrap();
        assert!(!lookup.from_cache);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_entry_expires_at_ttl_boundary() {
        let (cache, _store, clock) = cache_with_clock();
        let kind = OperationKind::QueryGeneration;
        let input = json!({});
        cache
            .get_or_generate("u1", &kind, &input, || async { Ok(json!({})) })
            .await
            .unwrap();

        clock.advance(chrono::Duration::minutes(15) - chrono::Duration::seconds(1));
        let lookup = cache
            .get_or_generate("u1", &kind, &input, || async { Ok(json!({})) })
            .await
            .unwrap();
        assert!(lookup.from_cache);

        clock.advance(chrono::Duration::seconds(1));
        let lookup = cache
            .get_or_generate("u1", &kind, &input, || async { Ok(json!({})) })
            .await
            .unwrap();
        assert!(!lookup.from_cache);
    }

    #[tokio::test]
    async fn test_invalidate_only_touches_subject() {
        let (cache, store, _clock) = cache_with_clock();
        for subject in ["u1", "u2"] {
            for kind in [OperationKind::SkinAnalysis, OperationKind::RoutineGeneration] {
                cache
                    .get_or_generate(subject, &kind, &json!({}), || async { Ok(json!({"v": 1})) })
                    .await
                    .unwrap();
            }
        }
        assert_eq!(store.len(), 4);

        let removed = cache
            .invalidate("u1", Some(&OperationKind::SkinAnalysis))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 3);

        let removed = cache.invalidate("u1", None).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.count_for_subject("u2"), 2);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let (cache, store, clock) = cache_with_clock();
        cache
            .get_or_generate("u1", &OperationKind::QueryGeneration, &json!({}), || async {
                Ok(json!({}))
            })
            .await
            .unwrap();
        cache
            .get_or_generate("u1", &OperationKind::SkinAnalysis, &json!({}), || async {
                Ok(json!({}))
            })
            .await
            .unwrap();

        clock.advance(chrono::Duration::hours(1));
        assert_eq!(cache.sweep_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_degraded_payload_is_not_cached() {
        let (cache, store, _clock) = cache_with_clock();
        let lookup = cache
            .get_or_generate("u1", &OperationKind::SkinAnalysis, &json!({}), || async {
                Ok(json!({"fallback": true, "error": "provider down"}))
            })
            .await
            .unwrap();
        assert_eq!(lookup.payload["fallback"], true);
        assert_eq!(store.len(), 0);
        assert_eq!(cache.stats().uncached_degraded, 1);
    }

    #[tokio::test]
    async fn test_generator_error_propagates_and_is_not_cached() {
        let (cache, store, _clock) = cache_with_clock();
        let result = cache
            .get_or_generate("u1", &OperationKind::SkinAnalysis, &json!({}), || async {
                Err(Error::Inference("boom".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.len(), 0);

        let lookup = cache
            .get_or_generate("u1", &OperationKind::SkinAnalysis, &json!({}), || async {
                Ok(json!({"ok": true}))
            })
            .await
            .unwrap();
        assert!(!lookup.from_cache);
    }

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _: &str, _: &str, _: DateTime<Utc>) -> Result<Option<CacheEntry>> {
            Err(Error::Cache("connection refused".into()))
        }
        async fn upsert(&self, _: CacheEntry) -> Result<()> {
            Err(Error::Cache("connection refused".into()))
        }
        async fn delete_for_subject(&self, _: &str, _: Option<&OperationKind>) -> Result<u64> {
            Err(Error::Cache("connection refused".into()))
        }
        async fn delete_expired(&self, _: DateTime<Utc>) -> Result<u64> {
            Err(Error::Cache("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_still_generates() {
        let cache = ResultCache::new(Arc::new(BrokenStore), TtlTable::default());
        let lookup = cache
            .get_or_generate("u1", &OperationKind::SkinAnalysis, &json!({}), || async {
                Ok(json!({"skin_type": "dry"}))
            })
            .await
            .unwrap();
        assert_eq!(lookup.payload["skin_type"], "dry");
        assert!(!lookup.from_cache);
        assert!(cache.stats().store_errors >= 2);
    }

    #[tokio::test]
    async fn test_in_flight_slot_is_released() {
        let (cache, _store, _clock) = cache_with_clock();
        cache
            .get_or_generate("u1", &OperationKind::SkinAnalysis, &json!({}), || async {
                Ok(json!({}))
            })
            .await
            .unwrap();
        assert!(cache.inner.in_flight.lock().unwrap().is_empty());
    }
}
