//! SQS adapter

use super::{ClaimedJob, JobQueue, QueueJob};
use crate::config::QueueSettings;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use aws_sdk_sqs::types::{Message, QueueAttributeName};
use aws_sdk_sqs::Client as SqsClient;
use backoff::{future::retry, ExponentialBackoff};
use std::time::Duration;
use tracing::{debug, error, warn};

/// SQS queue client wrapper
pub struct SqsQueue {
    client: SqsClient,
    url: String,
    wait_time_seconds: i32,
    visibility_timeout: i32,
}

impl SqsQueue {
    /// Create a queue client from the ambient AWS configuration
    pub async fn new(settings: &QueueSettings) -> Result<Self> {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::with_client(SqsClient::new(&aws_config), settings)
    }

    /// Create with an existing SQS client
    pub fn with_client(client: SqsClient, settings: &QueueSettings) -> Result<Self> {
        let url = settings.url.clone().ok_or_else(|| AppError::Configuration {
            message: "queue.url is required for the sqs backend".to_string(),
        })?;

        Ok(Self {
            client,
            url,
            wait_time_seconds: settings.poll_timeout_secs.min(20) as i32,
            visibility_timeout: settings.visibility_timeout_secs.min(43_200) as i32,
        })
    }

    fn send_backoff() -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(200),
            max_interval: Duration::from_secs(5),
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..ExponentialBackoff::default()
        }
    }

    async fn receive_one(&self) -> Result<Option<Message>> {
        let result = self
            .client
            .receive_message()
            .queue_url(&self.url)
            .max_number_of_messages(1)
            .visibility_timeout(self.visibility_timeout)
            .wait_time_seconds(self.wait_time_seconds)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to receive messages: {}", e),
            })?;

        Ok(result.messages.unwrap_or_default().into_iter().next())
    }
}

#[async_trait]
impl JobQueue for SqsQueue {
    async fn enqueue(&self, job: &QueueJob) -> Result<String> {
        let body = job.to_body()?;

        let result = retry(Self::send_backoff(), || async {
            self.client
                .send_message()
                .queue_url(&self.url)
                .message_body(&body)
                .send()
                .await
                .map_err(|e| {
                    warn!(error = %e, "Queue send failed, retrying");
                    backoff::Error::transient(AppError::QueueError {
                        message: format!("Failed to send message: {}", e),
                    })
                })
        })
        .await?;

        let message_id = result.message_id.unwrap_or_default();
        debug!(message_id = %message_id, record_id = %job.record_id, "Job sent to queue");

        Ok(message_id)
    }

    async fn claim(&self) -> Result<Option<ClaimedJob>> {
        loop {
            let Some(message) = self.receive_one().await? else {
                return Ok(None);
            };
            let Some(receipt) = message.receipt_handle.clone() else {
                warn!("Received message without receipt handle");
                continue;
            };

            let body = message.body.as_deref().unwrap_or_default();
            match QueueJob::from_body(body) {
                Ok(job) => return Ok(Some(ClaimedJob { job, receipt })),
                Err(e) => {
                    // Unparseable messages can never succeed; drop them.
                    error!(error = %e, message_id = ?message.message_id, "Discarding malformed job");
                    self.delete(&receipt).await?;
                }
            }
        }
    }

    /// Delete a message after processing
    async fn delete(&self, receipt: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to delete message: {}", e),
            })?;

        debug!("Message deleted from queue");
        Ok(())
    }

    async fn release(&self, receipt: &str) -> Result<()> {
        self.client
            .change_message_visibility()
            .queue_url(&self.url)
            .receipt_handle(receipt)
            .visibility_timeout(0)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to release message: {}", e),
            })?;

        debug!("Message released back to queue");
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let result = self
            .client
            .get_queue_attributes()
            .queue_url(&self.url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to read queue attributes: {}", e),
            })?;

        let count = result
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::ApproximateNumberOfMessages))
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(0);

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_are_clamped_to_sqs_limits() {
        let config = aws_sdk_sqs::Config::builder()
            .behavior_version(aws_sdk_sqs::config::BehaviorVersion::latest())
            .region(aws_sdk_sqs::config::Region::new("us-east-1"))
            .build();
        let settings = QueueSettings {
            url: Some("https://sqs.us-east-1.amazonaws.com/1/reports".into()),
            poll_timeout_secs: 60,
            ..QueueSettings::default()
        };

        let queue = SqsQueue::with_client(SqsClient::from_conf(config), &settings).unwrap();
        assert_eq!(queue.wait_time_seconds, 20);
        assert_eq!(queue.visibility_timeout, 1800);
    }

    #[test]
    fn test_missing_url_is_configuration_error() {
        let config = aws_sdk_sqs::Config::builder()
            .behavior_version(aws_sdk_sqs::config::BehaviorVersion::latest())
            .region(aws_sdk_sqs::config::Region::new("us-east-1"))
            .build();
        let result = SqsQueue::with_client(SqsClient::from_conf(config), &QueueSettings::default());
        assert!(matches!(result, Err(AppError::Configuration { .. })));
    }
}
