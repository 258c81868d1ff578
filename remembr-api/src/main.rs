//! Remembr API server entry point.
//!
//! Bootstraps configuration, the storage and cache pools, the embedding
//! worker pool, and the Axum HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use remembr_api::auth::AuthConfig;
use remembr_api::db::{DbClient, DbConfig};
use remembr_api::services::embedding::{EmbeddingClient, EmbeddingWorkerPool};
use remembr_api::services::episodic::EpisodicMemory;
use remembr_api::services::forgetting::ForgettingService;
use remembr_api::services::short_term::ShortTermMemory;
use remembr_api::{create_api_router, ApiError, ApiResult, AppState};
use remembr_cache::CacheService;
use remembr_core::Settings;
use secrecy::ExposeSecret;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ApiResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = Settings::from_env();
    settings.validate().map_err(ApiError::from)?;
    if settings.has_insecure_secret() {
        tracing::warn!(
            "Using the insecure default signing secret; set REMEMBR_SECRET_KEY before deploying"
        );
    }

    let db_config = DbConfig::from_settings(&settings);
    let db = DbClient::from_config(&db_config)?;

    let cache = CacheService::connect(settings.redis_url.expose_secret())
        .await
        .map_err(|e| ApiError::internal(format!("Failed to connect to Redis: {}", e)))?;

    let embedding_client = Arc::new(EmbeddingClient::from_settings(&settings));
    let workers = EmbeddingWorkerPool::spawn(
        embedding_client.clone(),
        db.clone(),
        settings.embedding_workers,
        settings.embedding_queue_len,
    );

    let short_term = ShortTermMemory::new(
        cache.clone(),
        settings.short_term_max_tokens,
        settings.short_term_auto_checkpoint_threshold,
    );
    let episodic = EpisodicMemory::new(embedding_client, workers);
    let forgetting = ForgettingService::new(db.clone(), cache.clone());
    let auth_config = AuthConfig::from_settings(&settings);

    let bind = settings.bind.clone();
    let port = settings.port;

    let state = AppState {
        settings: Arc::new(settings),
        db,
        cache,
        auth_config,
        short_term,
        episodic,
        forgetting,
    };

    let app = create_api_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port)
        .parse()
        .map_err(|e| ApiError::internal(format!("Invalid bind address: {}", e)))?;
    tracing::info!(%addr, "Starting Remembr API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
