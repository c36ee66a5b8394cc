//! Durable job queue for async generation
//!
//! Provides:
//! - The `JobQueue` trait consumed by the orchestrator and worker
//! - An SQS adapter with retrying sends
//! - An in-process queue for tests and single-node runs

mod memory;
mod sqs;

pub use memory::InMemoryQueue;
pub use sqs::SqsQueue;

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One queued generation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueJob {
    pub kind: String,
    pub subject: String,
    pub record_id: Uuid,
}

impl QueueJob {
    pub fn new(kind: &str, subject: &str, record_id: Uuid) -> Self {
        Self {
            kind: kind.to_string(),
            subject: subject.to_string(),
            record_id,
        }
    }

    pub fn to_body(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| AppError::QueueError {
            message: format!("Failed to serialize job: {}", e),
        })
    }

    pub fn from_body(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| AppError::QueueError {
            message: format!("Failed to parse job: {}", e),
        })
    }
}

/// A job taken off the queue, invisible to other consumers until
/// deleted or released
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedJob {
    pub job: QueueJob,
    pub receipt: String,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Returns the queue's message id
    async fn enqueue(&self, job: &QueueJob) -> Result<String>;

    /// Take the next job, or `None` when nothing is ready
    async fn claim(&self) -> Result<Option<ClaimedJob>>;

    /// Acknowledge a finished job
    async fn delete(&self, receipt: &str) -> Result<()>;

    /// Make a claimed job visible again for another attempt
    async fn release(&self, receipt: &str) -> Result<()>;

    /// Jobs waiting to be claimed
    async fn count(&self) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_body_round_trip() {
        let job = QueueJob::new("work_style", "u1", Uuid::new_v4());
        let body = job.to_body().unwrap();
        assert!(body.contains("\"record_id\""));
        assert_eq!(QueueJob::from_body(&body).unwrap(), job);
    }

    #[test]
    fn test_malformed_body_is_queue_error() {
        assert!(matches!(
            QueueJob::from_body("{\"kind\":1}"),
            Err(AppError::QueueError { .. })
        ));
    }
}
