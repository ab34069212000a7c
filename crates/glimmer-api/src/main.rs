use std::sync::Arc;

use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use glimmer_api::{router, AppState, ServerConfig};
use glimmer_cache::ResultCache;
use glimmer_core::GenerationBackend;
use glimmer_db::{Database, FilesystemObjectStore};
use glimmer_inference::{OpenAIBackend, RetryingInvoker};
use glimmer_jobs::{JobQueue, PhotoAnalysisHandler};
use glimmer_search::{SchemaAllowlist, SearchConfig, SearchService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "glimmer=info,tower_http=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "glimmer_api=info,glimmer_core=info,glimmer_db=info,glimmer_inference=info,\
         glimmer_cache=info,glimmer_jobs=info,glimmer_search=info,tower_http=info"
            .into()
    });
    let registry = tracing_subscriber::registry().with(env_filter);
    if log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        let mut layer = tracing_subscriber::fmt::layer();
        if let Some(ansi) = log_ansi {
            layer = layer.with_ansi(ansi);
        }
        registry.with(layer).init();
    }

    let config = ServerConfig::from_env();
    info!(
        subsystem = "api",
        log_format = %log_format,
        bind = %config.bind_address(),
        object_store = %config.object_store_path.display(),
        "Starting glimmer-api"
    );

    info!(subsystem = "api", "Connecting to database...");
    let db = Database::connect(&config.database_url).await?;
    db.migrate().await?;
    info!(subsystem = "api", "Database ready");

    let backend: Arc<dyn GenerationBackend> = Arc::new(OpenAIBackend::from_env()?);
    let invoker = RetryingInvoker::from_env(backend);

    let cache = ResultCache::from_env(Arc::new(db.cache.clone()));
    let sweeper = cache.spawn_sweeper(ResultCache::sweep_interval_from_env());

    let photos = Arc::new(FilesystemObjectStore::new(&config.object_store_path));

    let queue = Arc::new(JobQueue::from_env(Arc::new(db.jobs.clone())));
    queue
        .register_handler(PhotoAnalysisHandler::new(
            invoker.clone(),
            photos.clone(),
            Arc::new(db.analyses.clone()),
            cache.clone(),
        ))
        .await;
    queue.start().await?;

    let search = SearchService::new(
        invoker,
        Arc::new(db.query_executor()),
        Arc::new(SchemaAllowlist::catalog()),
        SearchConfig::from_env(),
    )
    .with_cache(cache.clone());

    let state = AppState::new(search, queue.clone(), photos, cache);
    let app = router(state, &config);

    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    info!(subsystem = "api", "Listening on {}", config.bind_address());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(subsystem = "api", "HTTP server stopped, draining job workers");
    if let Err(e) = queue.shutdown().await {
        error!(subsystem = "api", error = %e, "Job queue shutdown failed");
    }
    sweeper.abort();
    info!(subsystem = "api", "Shutdown complete");

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(subsystem = "api", error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(subsystem = "api", error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(subsystem = "api", "Received Ctrl+C"),
        _ = terminate => info!(subsystem = "api", "Received SIGTERM"),
    }
}
