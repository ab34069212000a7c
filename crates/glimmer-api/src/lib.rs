//! # glimmer-api
//!
//! HTTP surface for glimmer.
//!
//! This crate provides:
//! - Natural-language product search with safe fallback (`POST /api/v1/search`)
//! - Photo upload feeding the analysis job queue (`POST /api/v1/photos/analyze`)
//! - Job status and queue metrics (`GET /api/v1/jobs/...`)
//! - Result cache statistics and per-subject invalidation (`/api/v1/cache/...`)
//!
//! The `glimmer-api` binary wires the PostgreSQL stores, the OpenAI-compatible
//! backend and the job workers into [`router`].

pub mod config;
pub mod error;
pub mod handlers;
pub mod state;

pub use config::ServerConfig;
pub use error::ApiError;
pub use state::AppState;

use std::time::Duration;

use axum::http::{header, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

/// Build the application router with its middleware stack.
pub fn router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        // Search
        .route("/api/v1/search", post(handlers::search::search))
        .route("/api/v1/search/stats", get(handlers::search::search_stats))
        // Photos
        .route("/api/v1/photos/analyze", post(handlers::photos::analyze_photo))
        // Jobs
        .route("/api/v1/jobs/metrics", get(handlers::jobs::job_metrics))
        .route("/api/v1/jobs/:id", get(handlers::jobs::get_job))
        // Cache
        .route("/api/v1/cache/stats", get(handlers::cache::cache_stats))
        .route(
            "/api/v1/cache/subjects/:subject_id",
            delete(handlers::cache::invalidate_subject),
        )
        // Middleware
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(config.origin_headers()))
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
                .max_age(Duration::from_secs(3600)),
        )
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .with_state(state)
}
