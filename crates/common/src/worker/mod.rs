//! Queue consumer for async generation
//!
//! Claims jobs, hands them to the orchestrator and acknowledges them.
//! A job is deleted once its outcome is settled and released back to the
//! queue when processing failed.

use crate::errors::Result;
use crate::generation::{ProcessOutcome, ReportGenerator};
use crate::metrics;
use crate::queue::JobQueue;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const MAX_FAILURES: u32 = 5;
const CIRCUIT_BREAK_DURATION: Duration = Duration::from_secs(30);
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// What happened to one claimed job
#[derive(Debug)]
pub enum JobResult {
    Done(ProcessOutcome),
    Failed { message: String },
}

/// Totals for a bounded drain of the queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainSummary {
    pub processed: usize,
    pub published: usize,
    pub superseded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl DrainSummary {
    fn record(&mut self, result: &JobResult) {
        self.processed += 1;
        match result {
            JobResult::Done(ProcessOutcome::Published(_)) => self.published += 1,
            JobResult::Done(ProcessOutcome::Superseded { .. }) => self.superseded += 1,
            JobResult::Done(ProcessOutcome::Skipped { .. }) => self.skipped += 1,
            JobResult::Failed { .. } => self.failed += 1,
        }
    }

    /// True when every processed job failed
    pub fn all_failed(&self) -> bool {
        self.processed > 0 && self.failed == self.processed
    }
}

pub struct QueueWorker {
    generator: Arc<ReportGenerator>,
    queue: Arc<dyn JobQueue>,
}

impl QueueWorker {
    pub fn new(generator: Arc<ReportGenerator>) -> Self {
        let queue = generator.queue().clone();
        Self { generator, queue }
    }

    /// Claim and process a single job; `None` when the queue is empty
    pub async fn process_next(&self) -> Result<Option<JobResult>> {
        let Some(claimed) = self.queue.claim().await? else {
            return Ok(None);
        };

        info!(
            record_id = %claimed.job.record_id,
            kind = %claimed.job.kind,
            subject = %claimed.job.subject,
            "Received generation job"
        );

        let result = match self.generator.process_queued(&claimed.job).await {
            Ok(outcome) => {
                metrics::record_queue_job(outcome.label());
                if let Err(e) = self.queue.delete(&claimed.receipt).await {
                    error!(error = %e, "Failed to delete message");
                }
                JobResult::Done(outcome)
            }
            Err(e) => {
                metrics::record_queue_job("failed");
                error!(
                    record_id = %claimed.job.record_id,
                    error = %e,
                    "Failed to process generation job"
                );
                if let Err(release) = self.queue.release(&claimed.receipt).await {
                    warn!(error = %release, "Failed to release message");
                }
                JobResult::Failed {
                    message: e.to_string(),
                }
            }
        };

        Ok(Some(result))
    }

    /// Process up to `limit` jobs, or the jobs waiting right now
    ///
    /// Released jobs go to the back of the queue, so a bounded drain never
    /// spins on one failing job.
    pub async fn drain(&self, limit: Option<usize>) -> Result<DrainSummary> {
        let budget = match limit {
            Some(limit) => limit,
            None => self.queue.count().await?,
        };

        let mut summary = DrainSummary::default();
        while summary.processed < budget {
            match self.process_next().await? {
                Some(result) => summary.record(&result),
                None => break,
            }
        }

        info!(
            processed = summary.processed,
            published = summary.published,
            failed = summary.failed,
            "Queue drain finished"
        );
        Ok(summary)
    }

    /// Poll until `shutdown` resolves, pausing after repeated failures
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut consecutive_failures = 0;

        loop {
            if consecutive_failures >= MAX_FAILURES {
                warn!(
                    failures = consecutive_failures,
                    "Circuit breaker open, pausing..."
                );
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(CIRCUIT_BREAK_DURATION) => {}
                }
                consecutive_failures = 0;
                info!("Circuit breaker reset, resuming...");
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                result = self.process_next() => {
                    match result {
                        Ok(Some(JobResult::Done(_))) => consecutive_failures = 0,
                        Ok(Some(JobResult::Failed { .. })) => consecutive_failures += 1,
                        Ok(None) => tokio::time::sleep(IDLE_POLL_INTERVAL).await,
                        Err(e) => {
                            consecutive_failures += 1;
                            error!(error = %e, "Failed to receive messages from queue");
                            tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }

        info!("Queue worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AiClient, ClientOptions, MockProvider, MockReply};
    use crate::cache::InMemoryCache;
    use crate::generation::GenerationSettings;
    use crate::inputs::{InMemoryInputCollector, Submission};
    use crate::queue::InMemoryQueue;
    use crate::store::{InMemoryReportStore, ReportStatus, ReportStore};
    use crate::strategy::{builtin, StrategyRegistry};
    use serde_json::json;

    const STYLE: &str = "work_style";
    const TRANSITIONS: &str = "career_transitions";

    struct Fixture {
        worker: QueueWorker,
        generator: Arc<ReportGenerator>,
        queue: Arc<InMemoryQueue>,
        store: Arc<InMemoryReportStore>,
        inputs: Arc<InMemoryInputCollector>,
    }

    fn fixture(provider: MockProvider) -> Fixture {
        let store = Arc::new(InMemoryReportStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let inputs = Arc::new(InMemoryInputCollector::new());
        let generator = Arc::new(ReportGenerator::new(
            store.clone(),
            Arc::new(InMemoryCache::new()),
            queue.clone(),
            inputs.clone(),
            AiClient::new(Arc::new(provider), ClientOptions::default()),
            Arc::new(StrategyRegistry::builtin()),
            GenerationSettings::default(),
        ));

        Fixture {
            worker: QueueWorker::new(generator.clone()),
            generator,
            queue,
            store,
            inputs,
        }
    }

    async fn submit(f: &Fixture, subject: &str, form_id: &str) {
        f.inputs
            .submit(
                subject,
                Submission::new(format!("{subject}-{form_id}"), form_id, json!({"answer": 1})),
            )
            .await;
    }

    #[tokio::test]
    async fn test_process_next_on_empty_queue() {
        let f = fixture(MockProvider::canned());
        assert!(f.worker.process_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_drain_publishes_and_acknowledges() {
        let f = fixture(MockProvider::canned());
        for subject in ["u1", "u2"] {
            submit(&f, subject, builtin::WORK_STYLE).await;
            f.generator
                .enqueue_generation(subject, STYLE)
                .await
                .unwrap();
        }

        let summary = f.worker.drain(None).await.unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.published, 2);
        assert!(!summary.all_failed());
        assert_eq!(f.queue.count().await.unwrap(), 0);
        assert_eq!(f.queue.in_flight().await, 0);

        let current = f.store.load_current("u1", STYLE).await.unwrap().unwrap();
        assert_eq!(current.status, ReportStatus::Published);
        assert_eq!(current.version, 1);
    }

    #[tokio::test]
    async fn test_failed_job_is_released_once_per_drain() {
        let f = fixture(MockProvider::scripted(vec![MockReply::Text("not json".into())]));
        submit(&f, "u1", builtin::WORK_STYLE).await;
        let queued = f
            .generator
            .enqueue_generation("u1", STYLE)
            .await
            .unwrap();

        let summary = f.worker.drain(None).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert!(summary.all_failed());
        assert_eq!(f.queue.count().await.unwrap(), 1);

        let record = f.store.find_by_id(queued.record_id).await.unwrap().unwrap();
        assert_eq!(record.status, ReportStatus::Failed);

        // Redelivery finds a settled record and acknowledges it.
        let retry = f.worker.drain(None).await.unwrap();
        assert_eq!(retry.skipped, 1);
        assert_eq!(f.queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_drain_respects_limit() {
        let f = fixture(MockProvider::canned());
        for subject in ["a", "b", "c"] {
            submit(&f, subject, builtin::TASK_ANALYSIS).await;
            f.generator
                .enqueue_generation(subject, TRANSITIONS)
                .await
                .unwrap();
        }

        let summary = f.worker.drain(Some(2)).await.unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(f.queue.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture(MockProvider::canned());
        submit(&f, "u1", builtin::WORK_STYLE).await;
        f.generator
            .enqueue_generation("u1", STYLE)
            .await
            .unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let store = f.store.clone();
        let waiter = tokio::spawn(async move {
            for _ in 0..200 {
                if store.load_current("u1", STYLE).await.unwrap().is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            let _ = tx.send(());
        });

        f.worker
            .run(async {
                let _ = rx.await;
            })
            .await;
        waiter.await.unwrap();

        assert!(f.store.load_current("u1", STYLE).await.unwrap().is_some());
    }
}
