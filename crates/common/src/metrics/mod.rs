//! Metrics and observability utilities
//!
//! Provides Prometheus metrics for report generation with standardized
//! naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all ReportForge metrics
pub const METRICS_PREFIX: &str = "reportforge";

/// Buckets for generation latency (model calls run for minutes)
pub const GENERATION_BUCKETS: &[f64] = &[
    1.0,   // 1s
    5.0,   // 5s
    10.0,  // 10s
    30.0,  // 30s
    60.0,  // 1m
    120.0, // 2m
    300.0, // 5m
    600.0, // 10m - default deadline
    1200.0,
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_generations_total", METRICS_PREFIX),
        Unit::Count,
        "Report generation cycles by kind and outcome"
    );

    describe_histogram!(
        format!("{}_generation_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Wall-clock time of a generation cycle"
    );

    describe_counter!(
        format!("{}_ai_attempts_total", METRICS_PREFIX),
        Unit::Count,
        "Completion attempts by model and status"
    );

    describe_histogram!(
        format!("{}_ai_attempt_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Latency of a single completion attempt"
    );

    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    describe_gauge!(
        format!("{}_queue_depth", METRICS_PREFIX),
        Unit::Count,
        "Number of generation jobs in queue"
    );

    describe_counter!(
        format!("{}_queue_jobs_processed_total", METRICS_PREFIX),
        Unit::Count,
        "Queue jobs processed by outcome"
    );

    tracing::info!("Metrics registered");
}

/// Helper to time a generation cycle
pub struct GenerationTimer {
    start: Instant,
    kind: String,
}

impl GenerationTimer {
    pub fn start(kind: &str) -> Self {
        Self {
            start: Instant::now(),
            kind: kind.to_string(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Record completion with an outcome label
    pub fn finish(self, outcome: &str) -> f64 {
        let duration = self.elapsed_secs();

        counter!(
            format!("{}_generations_total", METRICS_PREFIX),
            "kind" => self.kind.clone(),
            "outcome" => outcome.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_generation_duration_seconds", METRICS_PREFIX),
            "kind" => self.kind
        )
        .record(duration);

        duration
    }
}

/// Helper to record a completion attempt
pub fn record_ai_attempt(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_ai_attempts_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_ai_attempt_duration_seconds", METRICS_PREFIX),
        "model" => model.to_string()
    )
    .record(duration_secs);
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}

/// Helper to record a processed queue job
pub fn record_queue_job(outcome: &str) {
    counter!(
        format!("{}_queue_jobs_processed_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_queue_depth(depth: usize) {
    gauge!(format!("{}_queue_depth", METRICS_PREFIX)).set(depth as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_buckets_sorted() {
        let mut prev = 0.0;
        for &bucket in GENERATION_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
        assert!(GENERATION_BUCKETS.contains(&600.0));
    }

    #[test]
    fn test_generation_timer() {
        let timer = GenerationTimer::start("career_transitions");
        std::thread::sleep(std::time::Duration::from_millis(5));
        let elapsed = timer.finish("published");
        assert!(elapsed > 0.0);
    }
}
