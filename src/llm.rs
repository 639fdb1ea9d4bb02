//! Chat-completion client.
//!
//! [`ChatModel`] is the seam the QA engine talks to: it takes an ordered
//! message list and returns a lazy stream of text deltas. [`OpenAiChat`]
//! implements it against any OpenAI-compatible `/chat/completions`
//! endpoint (OpenAI itself, or Ollama's `/v1` API) using server-sent events.

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;

use knowba_core::models::ChatMessage;

use crate::config::LlmConfig;

/// Incremental answer text. Finite; ends after the model's last delta.
pub type DeltaStream = BoxStream<'static, Result<String, LlmError>>;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Start one streamed completion over `messages`.
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<DeltaStream, LlmError>;
}

/// Build the chat model named by `llm.provider`.
pub fn create_chat_model(config: &LlmConfig) -> Result<Box<dyn ChatModel>> {
    match config.provider.as_str() {
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
            let base_url = config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
            Ok(Box::new(OpenAiChat::new(config, base_url, Some(api_key))?))
        }
        "ollama" => {
            let base_url = config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434/v1".to_string());
            Ok(Box::new(OpenAiChat::new(config, base_url, None)?))
        }
        other => bail!("Unknown llm provider: {}", other),
    }
}

pub struct OpenAiChat {
    model: String,
    temperature: f32,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig, base_url: String, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            base_url,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<DeltaStream, LlmError> {
        let body = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            stream: true,
        };

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, message });
        }

        let bytes = resp.bytes_stream().map_ok(|b| b.to_vec()).boxed();
        Ok(sse_deltas(bytes))
    }
}

/// One decoded server-sent event of a streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Delta(String),
    Done,
    Error(String),
}

/// Line-buffered decoder for `data: {...}` completion events.
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across network reads decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns the events completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            decode_line(&String::from_utf8_lossy(&line), &mut events);
        }
        events
    }

    /// Flush a trailing line that had no terminating newline.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        let mut events = Vec::new();
        decode_line(&String::from_utf8_lossy(&rest), &mut events);
        events
    }
}

fn decode_line(line: &str, events: &mut Vec<SseEvent>) {
    let Some(data) = line.trim().strip_prefix("data:").map(str::trim) else {
        return;
    };
    if data.is_empty() {
        return;
    }
    if data == "[DONE]" {
        events.push(SseEvent::Done);
        return;
    }
    let json: serde_json::Value = match serde_json::from_str(data) {
        Ok(json) => json,
        Err(e) => {
            events.push(SseEvent::Error(format!("bad stream event: {}", e)));
            return;
        }
    };
    if let Some(err) = json.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        events.push(SseEvent::Error(message));
        return;
    }
    let Some(choice) = json.get("choices").and_then(|c| c.get(0)) else {
        return;
    };
    if let Some(content) = choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
    {
        if !content.is_empty() {
            events.push(SseEvent::Delta(content.to_string()));
        }
    }
    if choice.get("finish_reason").is_some_and(|r| !r.is_null()) {
        events.push(SseEvent::Done);
    }
}

struct SseState {
    bytes: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    decoder: SseDecoder,
    pending: VecDeque<SseEvent>,
    finished: bool,
}

/// Turn a raw SSE byte stream into a stream of text deltas.
fn sse_deltas(bytes: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>) -> DeltaStream {
    let state = SseState {
        bytes,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            match st.pending.pop_front() {
                Some(SseEvent::Delta(text)) => return Some((Ok(text), st)),
                Some(SseEvent::Error(message)) => {
                    st.finished = true;
                    st.pending.clear();
                    return Some((Err(LlmError::Parse(message)), st));
                }
                Some(SseEvent::Done) => {
                    st.finished = true;
                    st.pending.clear();
                }
                None => {}
            }
            if st.finished {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => st.pending.extend(st.decoder.push(&chunk)),
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(LlmError::Http(e)), st));
                }
                None => {
                    // A terminator flushed from the tail clears this error
                    // before it is reached.
                    st.pending.extend(st.decoder.finish());
                    st.pending
                        .push_back(SseEvent::Error("stream ended before completion".into()));
                }
            }
        }
    })
    .boxed()
}
