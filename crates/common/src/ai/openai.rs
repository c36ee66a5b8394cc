//! OpenAI-compatible chat completion provider

use super::extract::sanitize_bytes;
use super::{CompletionProvider, CompletionRequest, CompletionResponse, ProviderError};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// OpenAI chat completion client
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

impl OpenAiProvider {
    /// Create a provider on a shared HTTP client
    pub fn new(
        client: reqwest::Client,
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
    ) -> Self {
        Self {
            client,
            api_key,
            model: model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: request.stream,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        if request.stream {
            let bytes = response
                .bytes_stream()
                .map(|chunk| chunk.map(|b| b.to_vec()).map_err(ProviderError::from))
                .boxed();
            return Ok(CompletionResponse::Stream(sse_deltas(bytes)));
        }

        let raw = response.bytes().await?;
        let parsed: ChatResponse = serde_json::from_str(&sanitize_bytes(&raw))
            .map_err(|e| ProviderError::Protocol(format!("invalid completion body: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(CompletionResponse::Whole)
            .ok_or_else(|| ProviderError::Protocol("empty completion".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// One parsed server-sent-event line
#[derive(Debug, Clone, PartialEq)]
pub enum SseLine {
    Delta(String),
    Done,
    Skip,
}

/// Parse a single `data:` line of a chat completion stream
pub fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();

    if data == "[DONE]" {
        return SseLine::Done;
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map(SseLine::Delta)
            .unwrap_or(SseLine::Skip),
        Err(e) => {
            tracing::debug!(error = %e, "Skipping unparseable stream event");
            SseLine::Skip
        }
    }
}

struct SseState {
    bytes: BoxStream<'static, Result<Vec<u8>, ProviderError>>,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    finished: bool,
}

impl SseState {
    /// Move every complete line out of the byte buffer
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            match parse_sse_line(text.trim()) {
                SseLine::Delta(delta) => self.pending.push_back(delta),
                SseLine::Done => {
                    self.finished = true;
                    self.buffer.clear();
                    break;
                }
                SseLine::Skip => {}
            }
        }
    }
}

/// Turn a raw SSE byte stream into content deltas
///
/// Lines are split on raw bytes so a multi-byte character cut across two
/// network chunks is decoded intact.
fn sse_deltas(
    bytes: BoxStream<'static, Result<Vec<u8>, ProviderError>>,
) -> BoxStream<'static, Result<String, ProviderError>> {
    let state = SseState {
        bytes,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(delta) = state.pending.pop_front() {
                return Some((Ok(delta), state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(&chunk);
                    state.drain_lines();
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.finished = true;
                    state.buffer.push(b'\n');
                    state.drain_lines();
                }
            }
        }
    })
    .boxed()
}
