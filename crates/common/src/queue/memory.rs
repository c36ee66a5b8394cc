//! In-process job queue

use super::{ClaimedJob, JobQueue, QueueJob};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct QueueState {
    ready: VecDeque<QueueJob>,
    claimed: HashMap<String, QueueJob>,
}

/// FIFO queue held in process memory
#[derive(Default)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs claimed but not yet deleted or released
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.claimed.len()
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn enqueue(&self, job: &QueueJob) -> Result<String> {
        self.state.lock().await.ready.push_back(job.clone());
        Ok(Uuid::new_v4().to_string())
    }

    async fn claim(&self) -> Result<Option<ClaimedJob>> {
        let mut state = self.state.lock().await;
        let Some(job) = state.ready.pop_front() else {
            return Ok(None);
        };

        let receipt = Uuid::new_v4().to_string();
        state.claimed.insert(receipt.clone(), job.clone());
        Ok(Some(ClaimedJob { job, receipt }))
    }

    async fn delete(&self, receipt: &str) -> Result<()> {
        self.state
            .lock()
            .await
            .claimed
            .remove(receipt)
            .map(|_| ())
            .ok_or_else(|| AppError::QueueError {
                message: format!("unknown receipt '{}'", receipt),
            })
    }

    async fn release(&self, receipt: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let job = state.claimed.remove(receipt).ok_or_else(|| AppError::QueueError {
            message: format!("unknown receipt '{}'", receipt),
        })?;
        state.ready.push_back(job);
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.state.lock().await.ready.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_claim_delete_release() {
        let queue = InMemoryQueue::new();
        queue.enqueue(&QueueJob::new("a", "u1", Uuid::new_v4())).await.unwrap();
        queue.enqueue(&QueueJob::new("b", "u1", Uuid::new_v4())).await.unwrap();
        assert_eq!(queue.count().await.unwrap(), 2);

        let first = queue.claim().await.unwrap().unwrap();
        assert_eq!(first.job.kind, "a");
        assert_eq!(queue.count().await.unwrap(), 1);
        assert_eq!(queue.in_flight().await, 1);

        queue.release(&first.receipt).await.unwrap();
        let second = queue.claim().await.unwrap().unwrap();
        assert_eq!(second.job.kind, "b");
        tokio_test::assert_ok!(queue.delete(&second.receipt).await);

        let retried = queue.claim().await.unwrap().unwrap();
        assert_eq!(retried.job.kind, "a");
        queue.delete(&retried.receipt).await.unwrap();

        assert!(queue.claim().await.unwrap().is_none());
        tokio_test::assert_err!(queue.delete("bogus").await);
    }
}
