//! ReportForge Common Library
//!
//! The report generation engine and every boundary it talks to:
//! - Generation orchestrator with staleness detection and versioning
//! - Prompt/validation strategies per report kind
//! - AI completion client with deadline and timeout retry
//! - Versioned report store (Postgres and in-memory)
//! - Tagged fast cache (Redis and in-memory)
//! - Durable job queue (SQS and in-memory) and its worker
//! - Error types, configuration and metrics

pub mod ai;
pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod fingerprint;
pub mod generation;
pub mod inputs;
pub mod metrics;
pub mod queue;
pub mod services;
pub mod store;
pub mod strategy;
pub mod worker;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use generation::{GenerationError, ReportGenerator};
pub use store::{ReportRecord, ReportStatus};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
