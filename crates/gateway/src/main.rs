//! ReportForge API Gateway
//!
//! JSON HTTP surface over the report engine:
//! - Synchronous generate-or-fetch and read-only lookups
//! - Async generation requests and record polling
//! - Cache invalidation hook for the form system
//! - Observability (logging, metrics, request ids)

mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use reportforge_common::{
    cache::ReportCache,
    config::AppConfig,
    db::DbPool,
    queue::JobQueue,
    services::{build_services, init_tracing, install_metrics_exporter},
    ReportGenerator,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub generator: Arc<ReportGenerator>,
    pub cache: Arc<dyn ReportCache>,
    pub queue: Arc<dyn JobQueue>,
    /// Absent when running without a database
    pub db: Option<DbPool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    init_tracing(&config.observability);

    info!("Starting ReportForge API Gateway v{}", reportforge_common::VERSION);

    install_metrics_exporter(&config.observability)?;

    let services = build_services(&config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to initialize services");
        e
    })?;

    let config = Arc::new(config);
    let state = AppState {
        config: config.clone(),
        generator: services.generator,
        cache: services.cache,
        queue: services.queue,
        db: Some(services.db),
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // Model calls can run for minutes; only non-generating routes get the
    // request timeout.
    let timeout = TimeoutLayer::new(state.config.request_timeout());

    let read_routes = Router::new()
        .route("/subjects/{subject}/reports", get(handlers::reports::list_reports).delete(handlers::reports::delete_reports))
        .route("/subjects/{subject}/reports/{kind}/current", get(handlers::reports::current_report))
        .route("/subjects/{subject}/reports/{kind}/jobs", post(handlers::reports::enqueue_report))
        .route("/subjects/{subject}/invalidate", post(handlers::reports::invalidate_subject))
        .route("/subjects/{subject}/stats", get(handlers::reports::subject_stats))
        .route("/records/{id}", get(handlers::records::get_record))
        .layer(timeout);

    let api_routes = Router::new()
        .route("/subjects/{subject}/reports/{kind}", get(handlers::reports::generate_report))
        .merge(read_routes);

    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use reportforge_common::{
        ai::{AiClient, ClientOptions, MockProvider},
        cache::InMemoryCache,
        generation::GenerationSettings,
        inputs::{InMemoryInputCollector, Submission},
        queue::InMemoryQueue,
        store::InMemoryReportStore,
        strategy::StrategyRegistry,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn test_app(forms: &[&str]) -> Router {
        let inputs = Arc::new(InMemoryInputCollector::new());
        for form in forms {
            inputs
                .submit("u1", Submission::new(format!("s-{form}"), *form, json!({"x": 1})))
                .await;
        }

        let cache: Arc<dyn ReportCache> = Arc::new(InMemoryCache::new());
        let queue: Arc<dyn JobQueue> = Arc::new(InMemoryQueue::new());
        let generator = Arc::new(ReportGenerator::new(
            Arc::new(InMemoryReportStore::new()),
            cache.clone(),
            queue.clone(),
            inputs,
            AiClient::new(Arc::new(MockProvider::canned()), ClientOptions::default()),
            Arc::new(StrategyRegistry::builtin()),
            GenerationSettings::default(),
        ));

        create_router(AppState {
            config: Arc::new(AppConfig::default()),
            generator,
            cache,
            queue,
            db: None,
        })
    }

    async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let app = test_app(&[]).await;
        let (status, body) = call(&app, "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body) = call(&app, "GET", "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
        assert_eq!(body["checks"]["database"]["status"], "disabled");
    }

    #[tokio::test]
    async fn test_generate_then_read_current() {
        let app = test_app(&["work_style"]).await;

        let (status, _) = call(&app, "GET", "/v1/subjects/u1/reports/work_style/current").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&app, "GET", "/v1/subjects/u1/reports/work_style").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], 1);
        assert_eq!(body["status"], "published");
        assert!(body.get("source_hash").is_none());

        let (status, body) = call(&app, "GET", "/v1/subjects/u1/reports/work_style/current").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["viewed_at"].is_string());

        let (_, body) = call(&app, "GET", "/v1/subjects/u1/reports").await;
        assert_eq!(body["reports"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let app = test_app(&[]).await;

        let (status, body) = call(&app, "GET", "/v1/subjects/u1/reports/work_style").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["action"], "complete_inputs");

        let (status, _) = call(&app, "GET", "/v1/subjects/u1/reports/horoscope").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let uri = format!("/v1/records/{}", uuid::Uuid::new_v4());
        let (status, _) = call(&app, "GET", &uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_enqueue_and_poll() {
        let app = test_app(&["work_style"]).await;

        let (status, first) = call(&app, "POST", "/v1/subjects/u1/reports/work_style/jobs").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(first["created"], true);

        let (_, second) = call(&app, "POST", "/v1/subjects/u1/reports/work_style/jobs").await;
        assert_eq!(second["record_id"], first["record_id"]);
        assert_eq!(second["created"], false);

        let poll = first["poll_url"].as_str().unwrap().to_string();
        let (status, record) = call(&app, "GET", &poll).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["status"], "pending");
        assert_eq!(record["version"], 0);
    }

    #[tokio::test]
    async fn test_delete_and_stats() {
        let app = test_app(&["work_style"]).await;
        call(&app, "GET", "/v1/subjects/u1/reports/work_style?force=true").await;
        call(&app, "GET", "/v1/subjects/u1/reports/work_style?force=true").await;

        let (_, stats) = call(&app, "GET", "/v1/subjects/u1/stats").await;
        assert_eq!(stats["counts"].as_array().unwrap().len(), 2);

        let (status, body) = call(&app, "DELETE", "/v1/subjects/u1/reports?kinds=work_style").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], 2);

        let (status, _) = call(&app, "POST", "/v1/subjects/u1/invalidate").await;
        assert_eq!(status, StatusCode::OK);
    }
}
