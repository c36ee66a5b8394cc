//! AI completion client
//!
//! Provides a unified interface over text-completion providers:
//! - OpenAI-compatible chat completions (whole or streamed)
//! - A scripted mock provider for tests and offline runs
//!
//! [`AiClient`] owns the deadline and the single timeout retry. Providers
//! only perform one attempt each.

mod extract;
mod mock;
mod openai;

pub use extract::{extract_json, sanitize_bytes, strip_control, strip_invalid};
pub use mock::{MockProvider, MockReply};
pub use openai::{parse_sse_line, OpenAiProvider, SseLine};

use crate::config::AiConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// One outbound completion call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
    pub stream: bool,
}

/// Provider output, either complete or as ordered chunks
pub enum CompletionResponse {
    Whole(String),
    Stream(BoxStream<'static, std::result::Result<String, ProviderError>>),
}

/// Failure of a single provider attempt
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    Protocol(String),
}

const TIMEOUT_MARKERS: &[&str] = &[
    "timed out",
    "timeout",
    "deadline",
    "operation timed out",
    "curl error 28",
];

impl ProviderError {
    /// Timeout classification by category and message text
    ///
    /// Transports do not always surface a structured timeout, so the
    /// rendered message is inspected as well.
    pub fn is_timeout(&self) -> bool {
        if matches!(self, ProviderError::Timeout(_)) {
            return true;
        }
        let message = self.to_string().to_lowercase();
        TIMEOUT_MARKERS.iter().any(|marker| message.contains(marker))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

/// Trait for completion providers
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Issue exactly one completion attempt
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<CompletionResponse, ProviderError>;

    /// Model identifier recorded on generated reports
    fn model_name(&self) -> &str;
}

/// Concatenate a response into one string, chunks in arrival order
pub async fn accumulate(
    response: CompletionResponse,
) -> std::result::Result<String, ProviderError> {
    match response {
        CompletionResponse::Whole(text) => Ok(text),
        CompletionResponse::Stream(mut chunks) => {
            let mut text = String::new();
            while let Some(chunk) = chunks.next().await {
                text.push_str(&chunk?);
            }
            Ok(text)
        }
    }
}

/// Request shaping shared by every call
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
    pub retry_delay: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
            stream: false,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl From<&AiConfig> for ClientOptions {
    fn from(config: &AiConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            stream: config.stream,
            retry_delay: config.retry_delay(),
        }
    }
}

/// Completion client with deadline and timeout retry
#[derive(Clone)]
pub struct AiClient {
    provider: Arc<dyn CompletionProvider>,
    options: ClientOptions,
}

impl AiClient {
    pub fn new(provider: Arc<dyn CompletionProvider>, options: ClientOptions) -> Self {
        Self { provider, options }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Complete a prompt within `timeout` per attempt
    ///
    /// A timed-out first attempt is retried once after a fixed delay when
    /// `allow_retry` is set. Any other failure returns immediately.
    pub async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        timeout: Duration,
        allow_retry: bool,
    ) -> Result<String> {
        let request = CompletionRequest {
            system_prompt: system_prompt.to_string(),
            user_prompt: user_prompt.to_string(),
            max_tokens: self.options.max_tokens,
            temperature: self.options.temperature,
            timeout,
            stream: self.options.stream,
        };

        let max_attempts: u32 = if allow_retry { 2 } else { 1 };
        let mut attempt = 0;

        loop {
            attempt += 1;
            let started = std::time::Instant::now();
            let result = self.attempt(&request).await;
            metrics::record_ai_attempt(
                started.elapsed().as_secs_f64(),
                self.model_name(),
                result.is_ok(),
            );

            match result {
                Ok(text) => {
                    debug!(attempt, chars = text.len(), "Completion received");
                    return Ok(text);
                }
                Err(e) if e.is_timeout() => {
                    if attempt < max_attempts {
                        warn!(
                            attempt,
                            max_attempts,
                            error = %e,
                            "Completion timed out, retrying"
                        );
                        tokio::time::sleep(self.options.retry_delay).await;
                        continue;
                    }
                    return Err(AppError::GenerationTimeout {
                        timeout_secs: timeout.as_secs(),
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Completion failed");
                    return Err(AppError::Upstream {
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    async fn attempt(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<String, ProviderError> {
        let call = async {
            let response = self.provider.complete(request).await?;
            accumulate(response).await
        };

        match tokio::time::timeout(request.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(format!(
                "deadline of {}ms elapsed",
                request.timeout.as_millis()
            ))),
        }
    }
}

/// Create a completion provider based on configuration
pub fn create_provider(
    config: &AiConfig,
    http: reqwest::Client,
) -> Result<Arc<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "openai" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "ai.api_key is required for the openai provider".to_string(),
            })?;
            Ok(Arc::new(OpenAiProvider::new(
                http,
                key,
                Some(config.model.clone()),
                config.api_base.clone(),
            )))
        }
        "mock" => Ok(Arc::new(MockProvider::canned())),
        other => Err(AppError::Configuration {
            message: format!("unknown ai provider '{}'", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(provider: Arc<MockProvider>) -> AiClient {
        AiClient::new(
            provider,
            ClientOptions {
                retry_delay: Duration::from_millis(1),
                ..ClientOptions::default()
            },
        )
    }

    #[tokio::test]
    async fn test_timeout_then_success_with_retry() {
        let provider = Arc::new(MockProvider::scripted(vec![
            MockReply::Timeout,
            MockReply::Text("{\"a\":1}".into()),
        ]));
        let text = client(provider.clone())
            .complete("sys", "prompt", Duration::from_secs(5), true)
            .await
            .unwrap();

        assert_eq!(text, "{\"a\":1}");
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_timeout_without_retry_fails_after_one_attempt() {
        let provider = Arc::new(MockProvider::scripted(vec![
            MockReply::Timeout,
            MockReply::Text("{\"a\":1}".into()),
        ]));
        let err = client(provider.clone())
            .complete("sys", "prompt", Duration::from_secs(5), false)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::GenerationTimeout { attempts: 1, .. }));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_two_timeouts_surface_generation_timeout() {
        let provider = Arc::new(MockProvider::scripted(vec![
            MockReply::Timeout,
            MockReply::Timeout,
            MockReply::Text("never".into()),
        ]));
        let err = client(provider.clone())
            .complete("sys", "prompt", Duration::from_secs(5), true)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::GenerationTimeout { attempts: 2, .. }));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_deadline_is_enforced() {
        let provider = Arc::new(MockProvider::scripted(vec![MockReply::Hang]));
        let err = client(provider.clone())
            .complete("sys", "prompt", Duration::from_millis(20), false)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::GenerationTimeout { .. }));
    }

    #[tokio::test]
    async fn test_non_timeout_failure_is_not_retried() {
        let provider = Arc::new(MockProvider::scripted(vec![
            MockReply::Error("invalid api key".into()),
            MockReply::Text("{}".into()),
        ]));
        let err = client(provider.clone())
            .complete("sys", "prompt", Duration::from_secs(5), true)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Upstream { .. }));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_stream_chunks_are_concatenated() {
        let provider = Arc::new(MockProvider::scripted(vec![MockReply::Chunks(vec![
            "```json\n{\"sum".into(),
            "mary\": \"ok\"}".into(),
            "\n```".into(),
        ])]));
        let text = client(provider)
            .complete("sys", "prompt", Duration::from_secs(5), false)
            .await
            .unwrap();

        assert_eq!(text, "```json\n{\"summary\": \"ok\"}\n```");
    }

    #[test]
    fn test_timeout_classification_by_message() {
        assert!(ProviderError::Transport("cURL error 28: Operation timed out".into()).is_timeout());
        assert!(ProviderError::Status {
            status: 504,
            body: "upstream request timeout".into()
        }
        .is_timeout());
        assert!(!ProviderError::Status {
            status: 504,
            body: "bad gateway".into()
        }
        .is_timeout());
        assert!(!ProviderError::Transport("connection refused".into()).is_timeout());
    }

    #[test]
    fn test_create_provider_requires_key() {
        let config = AiConfig::default();
        let result = create_provider(&config, reqwest::Client::new());
        assert!(matches!(result, Err(AppError::Configuration { .. })));

        let mock = AiConfig {
            provider: "mock".into(),
            ..AiConfig::default()
        };
        let provider = create_provider(&mock, reqwest::Client::new()).unwrap();
        assert_eq!(provider.model_name(), "mock-completion");
    }
}
