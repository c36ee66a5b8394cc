//! Scripted completion provider for testing

use super::{CompletionProvider, CompletionRequest, CompletionResponse, ProviderError};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Requests kept for inspection; older ones are dropped
const MAX_RECORDED_REQUESTS: usize = 32;

/// One scripted provider outcome
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Whole-text response
    Text(String),
    /// Streamed response, chunks delivered in order
    Chunks(Vec<String>),
    /// Transport-level timeout
    Timeout,
    /// Non-timeout failure with the given message
    Error(String),
    /// Never completes; only the client deadline ends it
    Hang,
}

/// Mock provider that replays a script, then a fallback reply
pub struct MockProvider {
    model: String,
    script: Mutex<VecDeque<MockReply>>,
    fallback: MockReply,
    calls: AtomicUsize,
    requests: Mutex<VecDeque<CompletionRequest>>,
}

impl MockProvider {
    pub fn scripted(replies: Vec<MockReply>) -> Self {
        Self {
            model: "mock-completion".to_string(),
            script: Mutex::new(replies.into()),
            fallback: MockReply::Error("mock script exhausted".to_string()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(VecDeque::new()),
        }
    }

    /// Always answer with the same text
    pub fn always(text: impl Into<String>) -> Self {
        Self {
            fallback: MockReply::Text(text.into()),
            ..Self::scripted(Vec::new())
        }
    }

    /// Offline provider whose answer satisfies every built-in kind
    pub fn canned() -> Self {
        Self::always(
            serde_json::json!({
                "summary": "Generated offline by the mock provider.",
                "transitions": [],
                "plan": { "steps": [], "timeline": "n/a" },
                "strengths": [],
                "watch_outs": []
            })
            .to_string(),
        )
    }

    /// Queue another reply at the end of the script
    pub fn push(&self, reply: MockReply) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(reply);
        }
    }

    /// Number of attempts made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most recent requests received, oldest first
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn next_reply(&self) -> MockReply {
        self.script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            if requests.len() == MAX_RECORDED_REQUESTS {
                requests.pop_front();
            }
            requests.push_back(request.clone());
        }

        match self.next_reply() {
            MockReply::Text(text) => Ok(CompletionResponse::Whole(text)),
            MockReply::Chunks(chunks) => Ok(CompletionResponse::Stream(
                stream::iter(chunks.into_iter().map(Ok)).boxed(),
            )),
            MockReply::Timeout => Err(ProviderError::Timeout("mock timeout".to_string())),
            MockReply::Error(message) => Err(ProviderError::Transport(message)),
            MockReply::Hang => {
                futures::future::pending::<()>().await;
                Err(ProviderError::Transport("unreachable".to_string()))
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
