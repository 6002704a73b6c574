use anyhow::Context;
use opsdeck_server::api::{self, AppState};
use opsdeck_server::config::AppConfig;
use opsdeck_server::db;
use opsdeck_server::repository::{
    DeployRepository, InMemoryMetricsStore, InMemoryRepository, MetricsStore, PgRepository,
    RedisMetricsStore,
};
use opsdeck_server::service::{
    DeployService, LogHub, MetricsService, PipelineExecutor, metrics::spawn_collector,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "opsdeck_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting OpsDeck server...");

    let config = AppConfig::from_env()?;
    config.validate()?;

    let repo: Arc<dyn DeployRepository> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = db::create_pool(url)
                .await
                .context("Failed to create database pool")?;
            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            Arc::new(PgRepository::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory storage");
            Arc::new(InMemoryRepository::new())
        }
    };

    let metrics_store: Arc<dyn MetricsStore> = match &config.redis_url {
        Some(url) => {
            tracing::info!("Connecting to Redis...");
            Arc::new(
                RedisMetricsStore::connect(url)
                    .await
                    .context("Failed to connect to Redis")?,
            )
        }
        None => {
            tracing::warn!("REDIS_URL not set, keeping metrics in memory");
            Arc::new(InMemoryMetricsStore::new())
        }
    };

    let hub = LogHub::spawn(config.hub_buffer);
    let executor = Arc::new(PipelineExecutor::new(
        repo.clone(),
        hub.clone(),
        config.script_shell.clone(),
    ));
    let deploy = Arc::new(DeployService::new(
        repo,
        executor,
        hub,
        config.summary_limit,
    ));
    let metrics = Arc::new(MetricsService::new(metrics_store, config.metrics_capacity));

    let collector = spawn_collector(metrics.clone(), config.metrics_interval);

    // Build router with all API endpoints
    let shutdown = CancellationToken::new();
    let app = api::create_router(AppState {
        deploy,
        metrics,
        shutdown: shutdown.clone(),
    });

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("Server error")?;

    collector.abort();
    tracing::info!("Server stopped");

    Ok(())
}

/// Waits for ctrl-c, then cancels `shutdown` so open event streams end
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
    shutdown.cancel();
}
