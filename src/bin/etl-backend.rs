use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use cloudsec_etl::app::create_app;
use cloudsec_etl::config::BackendConfig;
use cloudsec_etl::db;
use cloudsec_etl::external::aggregate_cache::{AggregateCache, RedisAggregateCache};
use cloudsec_etl::external::prisma_cloud::PrismaCloudClient;
use cloudsec_etl::logging::{init_logging, LoggingConfig};
use cloudsec_etl::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    init_logging(LoggingConfig::from_env("etl-backend"))
        .map_err(|e| anyhow::anyhow!("logging setup failed: {}", e))?;

    let config = BackendConfig::from_env().context("invalid backend configuration")?;

    let pool = db::connect(&config.database_url, config.http_timeout)
        .await
        .context("failed to connect to database")?;
    db::migrate(&pool).await.context("failed to run migrations")?;

    // reports answer 503 while Redis is unreachable; nothing else depends on it
    let cache: Arc<dyn AggregateCache> = Arc::new(
        RedisAggregateCache::new(&config.redis_url, config.http_timeout)
            .context("invalid cache configuration")?,
    );

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("failed to build HTTP client")?;

    let state = AppState {
        pool,
        cache,
        upstream: PrismaCloudClient::new(http),
    };
    let app = create_app(state);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("ETL backend listening on http://{}/", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
