//! Health check handlers

use axum::{extract::State, Json};
use serde::Serialize;
use std::time::Instant;

use crate::AppState;
use reportforge_common::errors::Result;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: CheckResult,
    pub cache: CheckResult,
    pub queue: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    fn from_probe<T>(start: Instant, result: Result<T>) -> Self {
        match result {
            Ok(_) => CheckResult {
                status: "up".to_string(),
                latency_ms: Some(start.elapsed().as_millis() as u64),
                error: None,
            },
            Err(e) => CheckResult {
                status: "down".to_string(),
                latency_ms: None,
                error: Some(e.to_string()),
            },
        }
    }

    fn disabled() -> Self {
        CheckResult {
            status: "disabled".to_string(),
            latency_ms: None,
            error: None,
        }
    }

    fn is_down(&self) -> bool {
        self.status == "down"
    }
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: reportforge_common::VERSION.to_string(),
    })
}

/// Readiness probe - checks all dependencies
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let database = match &state.db {
        Some(db) => {
            let start = Instant::now();
            CheckResult::from_probe(start, db.ping().await)
        }
        None => CheckResult::disabled(),
    };

    let start = Instant::now();
    let cache = CheckResult::from_probe(start, state.cache.ping().await);

    let start = Instant::now();
    let queue = CheckResult::from_probe(start, state.queue.count().await);

    let all_healthy = !database.is_down() && !cache.is_down() && !queue.is_down();

    Json(ReadyResponse {
        status: if all_healthy { "ready" } else { "not_ready" }.to_string(),
        checks: HealthChecks {
            database,
            cache,
            queue,
        },
    })
}
