use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use cloudsec_etl::config::WorkerConfig;
use cloudsec_etl::db::{self, coverage_queries::PgCoverageStore, defender_queries::PgDefenderStore};
use cloudsec_etl::external::aggregate_cache::RedisAggregateCache;
use cloudsec_etl::external::credential_source::HttpCredentialSource;
use cloudsec_etl::external::job_state::HttpJobStateStore;
use cloudsec_etl::external::prisma_cloud::PrismaCloudClient;
use cloudsec_etl::jobs::defenders_coverage_job::DefendersCoverageJob;
use cloudsec_etl::jobs::defenders_deployed_job::DefendersDeployedJob;
use cloudsec_etl::jobs::ConnectorKind;
use cloudsec_etl::logging::{init_logging, LoggingConfig};
use cloudsec_etl::services::clock::SystemClock;
use cloudsec_etl::services::scheduler::{SchedulerLoop, SchedulerPorts};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    init_logging(LoggingConfig::from_env("cloudsec-etl"))
        .map_err(|e| anyhow::anyhow!("logging setup failed: {}", e))?;

    let config = WorkerConfig::from_env().context("invalid worker configuration")?;

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("failed to build HTTP client")?;

    let pool = db::connect(&config.database_url, config.http_timeout)
        .await
        .context("failed to connect to database")?;
    db::migrate(&pool).await.context("failed to run migrations")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested; finishing in-flight ticks");
        let _ = shutdown_tx.send(true);
    });

    // connects on first publish; until then runs still write and advance
    let cache = RedisAggregateCache::new(&config.redis_url, config.http_timeout)
        .context("invalid cache configuration")?;

    let ports = SchedulerPorts {
        job_state: Arc::new(HttpJobStateStore::new(http.clone(), &config.backend_api_url)),
        credentials: Arc::new(HttpCredentialSource::new(http.clone(), &config.backend_api_url)),
        cache: Arc::new(cache),
        clock: Arc::new(SystemClock),
    };
    let upstream = PrismaCloudClient::new(http);

    let mut tasks = JoinSet::new();
    for (kind, connector) in config.connectors {
        info!(
            "Starting connector {} (retention {} days, every {} day(s), cache key {})",
            connector.name, connector.retention_days, connector.interval_days, connector.cache_key
        );
        let settings = config.scheduler.clone();
        let ports = ports.clone();
        let shutdown = shutdown_rx.clone();

        match kind {
            ConnectorKind::DefendersDeployed => {
                let scheduler = SchedulerLoop::new(
                    connector,
                    settings,
                    ports,
                    DefendersDeployedJob::new(upstream.clone()),
                    PgDefenderStore::new(pool.clone()),
                );
                tasks.spawn(scheduler.run(shutdown));
            }
            ConnectorKind::DefendersCoverage => {
                let scheduler = SchedulerLoop::new(
                    connector,
                    settings,
                    ports,
                    DefendersCoverageJob::new(upstream.clone()),
                    PgCoverageStore::new(pool.clone()),
                );
                tasks.spawn(scheduler.run(shutdown));
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("Connector task aborted: {}", e);
        }
    }

    pool.close().await;
    info!("All connectors stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
