//! Streaming response aggregation and first-token/usage accounting.
//!
//! [`StreamAggregator`] consumes one [`StreamChunk`] at a time from a
//! pull-based source and assembles the visible response text. Per chunk, in
//! order: the first-chunk latch records time-to-first-token and prepends the
//! TTFT line; a usage record (which may arrive interleaved with content, not
//! necessarily last) appends a usage block; a content delta is appended;
//! chunks with no choices or an empty delta are skipped. All state is local
//! to one in-flight turn — concurrent turns need independent aggregators.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Instant;

use crate::models::{StreamChunk, Usage, UsageSummary};

/// Cosmetic "still generating" marker appended to displayed (never stored)
/// text from the second content-bearing render onward.
pub const TEXT_CURSOR: &str = "▕🔥";

/// A pull-based, non-restartable source of stream chunks.
///
/// `next_chunk` returns `Ok(None)` on exhaustion. If the underlying transport
/// is interrupted, the partially accumulated text is the final result.
#[async_trait]
pub trait ChunkSource: Send {
    async fn next_chunk(&mut self) -> Result<Option<StreamChunk>>;
}

/// Receives the displayed text after every non-skipped chunk.
pub trait Renderer {
    fn render(&mut self, frame: &str);
}

/// Renderer that drops every frame (used by `ask --quiet` style callers and
/// tests that only care about the final text).
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn render(&mut self, _frame: &str) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    AwaitingFirstToken,
    Streaming,
    Finished,
}

/// Accumulates a single turn's streamed response.
pub struct StreamAggregator {
    started_at: Instant,
    state: StreamState,
    text: String,
    ttft_line: String,
    ttft_seconds: f64,
    usage: Option<UsageSummary>,
    first_text: bool,
    cursor_armed: bool,
}

impl StreamAggregator {
    /// `started_at` is the instant the completion request was submitted;
    /// TTFT and total time are measured against it.
    pub fn new(started_at: Instant) -> Self {
        Self {
            started_at,
            state: StreamState::AwaitingFirstToken,
            text: String::new(),
            ttft_line: String::new(),
            ttft_seconds: 0.0,
            usage: None,
            first_text: true,
            cursor_armed: false,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Process one chunk. Returns true when the accumulated text changed and
    /// the caller should re-render.
    pub fn push(&mut self, chunk: &StreamChunk) -> bool {
        self.push_at(chunk, Instant::now())
    }

    /// Like [`push`](Self::push) with an explicit observation time.
    pub fn push_at(&mut self, chunk: &StreamChunk, now: Instant) -> bool {
        if self.state == StreamState::Finished {
            return false;
        }

        let mut changed = false;

        // First-chunk latch: fires exactly once, regardless of chunk content.
        if self.state == StreamState::AwaitingFirstToken {
            self.ttft_seconds = now.duration_since(self.started_at).as_secs_f64();
            self.ttft_line = format!("TTFT: {:.2}s\n\n", self.ttft_seconds);
            self.text.push_str(&self.ttft_line);
            self.state = StreamState::Streaming;
            changed = true;
        }

        if let Some(usage) = chunk.usage {
            let summary = self.summarize_usage(&usage, now);
            self.text.push_str(&format_usage_block(&summary, &self.ttft_line));
            self.usage = Some(summary);
            changed = true;
        }

        // No choices or an empty delta is a heartbeat, not an error.
        if let Some(content) = chunk
            .choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
        {
            if !content.is_empty() {
                self.text.push_str(content);
                // The cursor appears only on renders after the first
                // content-bearing one.
                self.cursor_armed = !self.first_text;
                self.first_text = false;
                changed = true;
            }
        }

        changed
    }

    fn summarize_usage(&self, usage: &Usage, now: Instant) -> UsageSummary {
        let total_time = now.duration_since(self.started_at).as_secs_f64();
        // A zero elapsed time would divide by zero; report the rate as
        // unavailable instead.
        let tokens_per_second = if total_time > 0.0 {
            Some(usage.total_tokens as f64 / total_time)
        } else {
            None
        };
        UsageSummary {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            total_time_seconds: total_time,
            tokens_per_second,
            time_to_first_token_seconds: self.ttft_seconds,
        }
    }

    /// Text for display: the accumulated text plus the cosmetic cursor while
    /// still streaming. The cursor never enters the stored text.
    pub fn display_text(&self) -> String {
        if self.cursor_armed && self.state == StreamState::Streaming {
            format!("{}{}", self.text, TEXT_CURSOR)
        } else {
            self.text.clone()
        }
    }

    /// Stored text so far, without the cursor.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Mark the stream exhausted and return the final text and usage.
    pub fn finish(mut self) -> (String, Option<UsageSummary>) {
        self.state = StreamState::Finished;
        (self.text, self.usage)
    }
}

fn format_usage_block(summary: &UsageSummary, ttft_line: &str) -> String {
    let rate = match summary.tokens_per_second {
        Some(tps) => format!("{:.2}", tps),
        None => "N/A".to_string(),
    };
    format!(
        "\n### Usage statistics:\n\n\
         {ttft_line}\
         prompt_tokens: {}\n\n\
         completion_tokens: {}\n\n\
         total_tokens: {}\n\n\
         total time taken: {:.2}s\n\n\
         T/s: {}\n",
        summary.prompt_tokens,
        summary.completion_tokens,
        summary.total_tokens,
        summary.total_time_seconds,
        rate,
    )
}

/// Drive a chunk source to exhaustion through an aggregator, rendering after
/// every non-skipped chunk.
pub async fn consume(
    source: &mut dyn ChunkSource,
    started_at: Instant,
    renderer: &mut dyn Renderer,
) -> Result<(String, Option<UsageSummary>)> {
    let mut aggregator = StreamAggregator::new(started_at);
    while let Some(chunk) = source.next_chunk().await? {
        if aggregator.push(&chunk) {
            renderer.render(&aggregator.display_text());
        }
    }
    Ok(aggregator.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct ScriptedSource(VecDeque<StreamChunk>);

    #[async_trait]
    impl ChunkSource for ScriptedSource {
        async fn next_chunk(&mut self) -> Result<Option<StreamChunk>> {
            Ok(self.0.pop_front())
        }
    }

    struct CapturingRenderer(Vec<String>);

    impl Renderer for CapturingRenderer {
        fn render(&mut self, frame: &str) {
            self.0.push(frame.to_string());
        }
    }

    fn at(start: Instant, secs_x100: u64) -> Instant {
        start + Duration::from_millis(secs_x100 * 10)
    }

    #[test]
    fn empty_stream_yields_empty_text_and_no_usage() {
        let aggregator = StreamAggregator::new(Instant::now());
        assert_eq!(aggregator.state(), StreamState::AwaitingFirstToken);
        let (text, usage) = aggregator.finish();
        assert_eq!(text, "");
        assert!(usage.is_none());
    }

    #[test]
    fn first_chunk_latch_fires_once_and_leads_the_text() {
        let start = Instant::now();
        let mut agg = StreamAggregator::new(start);

        agg.push_at(&StreamChunk::content("hello "), at(start, 50));
        agg.push_at(&StreamChunk::content("world"), at(start, 60));

        let (text, _) = agg.finish();
        assert!(text.starts_with("TTFT: 0.50s\n\n"));
        assert_eq!(text.matches("TTFT:").count(), 1);
        assert!(text.ends_with("hello world"));
    }

    #[test]
    fn latch_fires_even_on_contentless_first_chunk() {
        let start = Instant::now();
        let mut agg = StreamAggregator::new(start);

        let changed = agg.push_at(&StreamChunk::default(), at(start, 25));
        assert!(changed);
        assert_eq!(agg.state(), StreamState::Streaming);
        assert_eq!(agg.text(), "TTFT: 0.25s\n\n");
    }

    #[test]
    fn tokens_per_second_computed_to_two_decimals() {
        let start = Instant::now();
        let mut agg = StreamAggregator::new(start);

        agg.push_at(&StreamChunk::content("x"), at(start, 10));
        agg.push_at(&StreamChunk::with_usage(10, 20, 30), at(start, 300));

        let (text, usage) = agg.finish();
        let usage = usage.unwrap();
        assert!((usage.tokens_per_second.unwrap() - 10.0).abs() < 1e-9);
        assert!((usage.total_time_seconds - 3.0).abs() < 1e-9);
        assert!(text.contains("T/s: 10.00"));
        assert!(text.contains("total_tokens: 30"));
    }

    #[test]
    fn zero_elapsed_time_reports_rate_unavailable() {
        let start = Instant::now();
        let mut agg = StreamAggregator::new(start);

        agg.push_at(&StreamChunk::with_usage(5, 5, 10), start);

        let (text, usage) = agg.finish();
        assert!(usage.unwrap().tokens_per_second.is_none());
        assert!(text.contains("T/s: N/A"));
    }

    #[test]
    fn heartbeat_chunks_are_skipped() {
        let start = Instant::now();
        let mut agg = StreamAggregator::new(start);
        agg.push_at(&StreamChunk::content("a"), at(start, 10));
        let before = agg.text().to_string();

        // No choices at all.
        assert!(!agg.push_at(&StreamChunk::default(), at(start, 20)));
        // A choice with a null delta content.
        let null_delta: StreamChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":null}}]}"#).unwrap();
        assert!(!agg.push_at(&null_delta, at(start, 30)));
        // Empty string content is also ignored.
        assert!(!agg.push_at(&StreamChunk::content(""), at(start, 40)));

        assert_eq!(agg.text(), before);
        assert_eq!(agg.state(), StreamState::Streaming);
    }

    #[test]
    fn usage_may_interleave_with_content() {
        let start = Instant::now();
        let mut agg = StreamAggregator::new(start);

        agg.push_at(&StreamChunk::content("before "), at(start, 10));
        agg.push_at(&StreamChunk::with_usage(1, 2, 3), at(start, 20));
        agg.push_at(&StreamChunk::content("after"), at(start, 30));

        let (text, usage) = agg.finish();
        assert!(usage.is_some());
        let usage_pos = text.find("### Usage statistics").unwrap();
        let before_pos = text.find("before").unwrap();
        let after_pos = text.find("after").unwrap();
        assert!(before_pos < usage_pos);
        assert!(usage_pos < after_pos);
    }

    #[test]
    fn cursor_appears_from_second_content_render_and_never_persists() {
        let start = Instant::now();
        let mut agg = StreamAggregator::new(start);

        agg.push_at(&StreamChunk::content("one"), at(start, 10));
        let first_frame = agg.display_text();
        assert!(!first_frame.contains(TEXT_CURSOR));

        agg.push_at(&StreamChunk::content(" two"), at(start, 20));
        let second_frame = agg.display_text();
        assert!(second_frame.ends_with(TEXT_CURSOR));

        let (text, _) = agg.finish();
        assert!(!text.contains(TEXT_CURSOR));
    }

    #[tokio::test]
    async fn consume_drives_source_to_exhaustion() {
        let start = Instant::now();
        let mut source = ScriptedSource(VecDeque::from(vec![
            StreamChunk::content("X "),
            StreamChunk::content("is "),
            StreamChunk::content("a "),
            StreamChunk::content("widget."),
            StreamChunk::with_usage(20, 4, 24),
        ]));
        let mut renderer = CapturingRenderer(Vec::new());

        let (text, usage) = consume(&mut source, start, &mut renderer).await.unwrap();

        assert!(text.starts_with("TTFT:"));
        assert!(text.contains("X is a widget."));
        assert!(text.contains("total_tokens: 24"));
        assert_eq!(usage.unwrap().total_tokens, 24);
        // One render per non-skipped chunk.
        assert_eq!(renderer.0.len(), 5);
        // No frame leaks the cursor into the stored text.
        assert!(!text.contains(TEXT_CURSOR));
    }

    #[tokio::test]
    async fn consume_of_empty_source_returns_empty() {
        let mut source = ScriptedSource(VecDeque::new());
        let mut renderer = NullRenderer;
        let (text, usage) = consume(&mut source, Instant::now(), &mut renderer)
            .await
            .unwrap();
        assert_eq!(text, "");
        assert!(usage.is_none());
    }
}
