//! ReportForge Worker
//!
//! Processes generation jobs from the queue:
//! 1. Claims a job pointing at a pending report record
//! 2. Skips it if the record settled or was superseded
//! 3. Generates the report and publishes it in place
//! 4. Acknowledges the job, or releases it for redelivery

use reportforge_common::{
    config::AppConfig,
    services::{build_services, init_tracing, install_metrics_exporter},
    worker::QueueWorker,
    VERSION,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    init_tracing(&config.observability);

    info!("Starting ReportForge Worker v{}", VERSION);

    install_metrics_exporter(&config.observability)?;

    let services = build_services(&config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to initialize services");
        e
    })?;

    let worker = QueueWorker::new(services.generator.clone());

    info!(
        backend = %config.queue.backend,
        "Report worker ready, starting queue polling..."
    );

    worker
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await;

    info!("Report worker shutting down");
    Ok(())
}
