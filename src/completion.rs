//! Streaming chat-completion client.
//!
//! Talks to an OpenAI-compatible `/v1/chat/completions` endpoint with
//! `stream: true` and `stream_options.include_usage: true`, and exposes the
//! response body as a [`ChunkSource`] of parsed [`StreamChunk`]s.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::models::{ChatMessage, StreamChunk};
use crate::stream::ChunkSource;

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_tokens: u64,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

pub struct CompletionClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u64,
}

impl CompletionClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    /// Submit a streaming completion and return the chunk source. The stream
    /// is not restartable: on interruption the caller keeps whatever text was
    /// accumulated so far.
    pub async fn stream_completion(&self, messages: &[ChatMessage]) -> Result<ChunkStream> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
        };

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Completion request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Completion request failed with {}: {}",
                status,
                body.chars().take(500).collect::<String>()
            ));
        }

        Ok(ChunkStream {
            body: Box::pin(response.bytes_stream()),
            decoder: SseLineDecoder::new(),
            pending: VecDeque::new(),
            done: false,
        })
    }
}

/// Incremental splitter for an SSE byte stream. Chunk boundaries from the
/// transport do not align with line boundaries, so bytes are buffered until a
/// newline arrives.
pub struct SseLineDecoder {
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed raw bytes, returning each complete line (without the trailing
    /// newline or carriage return).
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }
}

impl Default for SseLineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of parsing one SSE line.
pub enum SseEvent {
    Chunk(StreamChunk),
    Done,
    Ignored,
}

/// Parse one SSE line: `data: {json}` yields a chunk, `data: [DONE]` ends
/// the stream, anything else (blank separators, comments) is ignored.
pub fn parse_sse_line(line: &str) -> Result<SseEvent> {
    let Some(data) = line.strip_prefix("data: ") else {
        return Ok(SseEvent::Ignored);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }
    let chunk: StreamChunk = serde_json::from_str(data)
        .with_context(|| format!("Malformed stream chunk: {}", data))?;
    Ok(SseEvent::Chunk(chunk))
}

type BodyStream =
    std::pin::Pin<Box<dyn futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>;

/// A live completion response body, decoded chunk by chunk.
pub struct ChunkStream {
    body: BodyStream,
    decoder: SseLineDecoder,
    pending: VecDeque<StreamChunk>,
    done: bool,
}

#[async_trait]
impl ChunkSource for ChunkStream {
    async fn next_chunk(&mut self) -> Result<Option<StreamChunk>> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Ok(Some(chunk));
            }
            if self.done {
                return Ok(None);
            }

            match self.body.next().await {
                Some(bytes) => {
                    let bytes = bytes.context("Error reading completion stream")?;
                    for line in self.decoder.feed(&bytes) {
                        match parse_sse_line(&line)? {
                            SseEvent::Chunk(chunk) => self.pending.push_back(chunk),
                            SseEvent::Done => {
                                self.done = true;
                                break;
                            }
                            SseEvent::Ignored => {}
                        }
                    }
                }
                // Body ended without an explicit [DONE]; treat as exhaustion.
                None => self.done = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_line_parses_to_chunk() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#;
        match parse_sse_line(line).unwrap() {
            SseEvent::Chunk(chunk) => {
                assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hi"));
            }
            _ => panic!("expected chunk"),
        }
    }

    #[test]
    fn done_marker_ends_the_stream() {
        assert!(matches!(
            parse_sse_line("data: [DONE]").unwrap(),
            SseEvent::Done
        ));
    }

    #[test]
    fn blank_and_comment_lines_are_ignored() {
        assert!(matches!(parse_sse_line("").unwrap(), SseEvent::Ignored));
        assert!(matches!(
            parse_sse_line(": keep-alive").unwrap(),
            SseEvent::Ignored
        ));
        assert!(matches!(
            parse_sse_line("event: message").unwrap(),
            SseEvent::Ignored
        ));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse_sse_line("data: {not json").is_err());
    }

    #[test]
    fn usage_only_chunk_parses_with_empty_choices() {
        let line = r#"data: {"choices":[],"usage":{"prompt_tokens":20,"completion_tokens":4,"total_tokens":24}}"#;
        match parse_sse_line(line).unwrap() {
            SseEvent::Chunk(chunk) => {
                assert!(chunk.choices.is_empty());
                assert_eq!(chunk.usage.unwrap().total_tokens, 24);
            }
            _ => panic!("expected chunk"),
        }
    }

    #[test]
    fn decoder_reassembles_lines_across_chunk_boundaries() {
        let mut decoder = SseLineDecoder::new();
        assert!(decoder.feed(b"data: {\"choices\"").is_empty());
        let lines = decoder.feed(b":[]}\n\ndata: [DONE]\n");
        assert_eq!(lines, vec!["data: {\"choices\":[]}", "", "data: [DONE]"]);
    }

    #[test]
    fn decoder_strips_carriage_returns() {
        let mut decoder = SseLineDecoder::new();
        let lines = decoder.feed(b"data: [DONE]\r\n");
        assert_eq!(lines, vec!["data: [DONE]"]);
    }

    #[test]
    fn request_body_shape() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let request = CompletionRequest {
            model: "LLama3b",
            messages: &messages,
            temperature: 0.5,
            max_tokens: 8192,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "LLama3b");
        assert_eq!(value["stream"], true);
        assert_eq!(value["stream_options"]["include_usage"], true);
        assert_eq!(value["messages"][0]["role"], "system");
    }
}
