//! Process bootstrap
//!
//! Builds every engine collaborator once per process from `AppConfig`
//! and hands them to the orchestrator by injection. Binaries call
//! [`build_services`] after loading configuration and never look
//! services up afterwards.

use crate::ai::{create_provider, AiClient, ClientOptions};
use crate::cache::{InMemoryCache, RedisCache, ReportCache};
use crate::config::{AppConfig, ObservabilityConfig};
use crate::db::{DbPool, ReportRepository, SeaOrmInputCollector};
use crate::errors::{AppError, Result};
use crate::generation::{GenerationSettings, ReportGenerator};
use crate::queue::{InMemoryQueue, JobQueue, SqsQueue};
use crate::strategy::StrategyRegistry;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Shared handles for one process
#[derive(Clone)]
pub struct Services {
    pub generator: Arc<ReportGenerator>,
    pub db: DbPool,
    pub cache: Arc<dyn ReportCache>,
    pub queue: Arc<dyn JobQueue>,
}

/// Connect every backend named in the configuration
pub async fn build_services(config: &AppConfig) -> Result<Services> {
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;

    let cache = build_cache(config).await?;
    let queue = build_queue(config).await?;

    let http = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()
        .map_err(|e| AppError::Configuration {
            message: format!("Failed to build HTTP client: {}", e),
        })?;
    let provider = create_provider(&config.ai, http)?;
    let ai = AiClient::new(provider, ClientOptions::from(&config.ai));
    info!(model = %ai.model_name(), provider = %config.ai.provider, "AI client initialized");

    let generator = Arc::new(ReportGenerator::new(
        Arc::new(ReportRepository::new(db.clone())),
        cache.clone(),
        queue.clone(),
        Arc::new(SeaOrmInputCollector::new(db.clone())),
        ai,
        Arc::new(StrategyRegistry::builtin()),
        GenerationSettings::from(config),
    ));

    Ok(Services {
        generator,
        db,
        cache,
        queue,
    })
}

async fn build_cache(config: &AppConfig) -> Result<Arc<dyn ReportCache>> {
    match config.cache.backend.as_str() {
        "redis" => {
            info!("Connecting to Redis cache...");
            Ok(Arc::new(RedisCache::new(&config.cache).await?))
        }
        "memory" => Ok(Arc::new(InMemoryCache::new())),
        other => Err(AppError::Configuration {
            message: format!("unknown cache backend '{}'", other),
        }),
    }
}

async fn build_queue(config: &AppConfig) -> Result<Arc<dyn JobQueue>> {
    match config.queue.backend.as_str() {
        "sqs" => {
            info!("Connecting to generation queue...");
            Ok(Arc::new(SqsQueue::new(&config.queue).await?))
        }
        "memory" => Ok(Arc::new(InMemoryQueue::new())),
        other => Err(AppError::Configuration {
            message: format!("unknown queue backend '{}'", other),
        }),
    }
}

/// Install the global tracing subscriber, writing to stderr
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Serve Prometheus metrics on `metrics_port`; zero disables it
pub fn install_metrics_exporter(config: &ObservabilityConfig) -> Result<()> {
    crate::metrics::register_metrics();

    if config.metrics_port == 0 {
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| AppError::Configuration {
            message: format!("Failed to install metrics exporter: {}", e),
        })?;

    info!(%addr, "Metrics exporter listening");
    Ok(())
}
