//! End-to-end turn: index documents with a fake embedder, retrieve context,
//! assemble the prompt, and aggregate a scripted completion stream.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::time::Instant;

use doctalk::embedding::Embedder;
use doctalk::index::VectorIndex;
use doctalk::models::{DocumentRecord, Role, StreamChunk};
use doctalk::prompt;
use doctalk::retriever::Retriever;
use doctalk::stream::{consume, ChunkSource, NullRenderer, TEXT_CURSOR};

/// Embeds a text as a unit vector keyed on its first byte.
struct ByteEmbedder;

#[async_trait]
impl Embedder for ByteEmbedder {
    fn model_name(&self) -> &str {
        "byte-fake"
    }
    fn dims(&self) -> usize {
        2
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let angle = (t.as_bytes().first().copied().unwrap_or(0) as f32) * 0.01;
                vec![angle.cos(), angle.sin()]
            })
            .collect())
    }
}

struct ScriptedSource(VecDeque<StreamChunk>);

#[async_trait]
impl ChunkSource for ScriptedSource {
    async fn next_chunk(&mut self) -> Result<Option<StreamChunk>> {
        Ok(self.0.pop_front())
    }
}

fn doc(id: &str, text: &str) -> DocumentRecord {
    DocumentRecord {
        id: id.to_string(),
        text: text.to_string(),
        source_file: format!("{}.txt", id),
        modified: Utc::now(),
        content_hash: id.to_string(),
    }
}

async fn indexed_retriever() -> Retriever {
    let embedder = ByteEmbedder;
    let docs = vec![
        doc("widgets", "X is a widget."),
        doc("gadgets", "Y is a gadget."),
        doc("misc", "Z is unrelated."),
    ];
    let texts: Vec<String> = docs.iter().map(|d| d.text.clone()).collect();
    let vectors = embedder.embed(&texts).await.unwrap();
    let mut index = VectorIndex::new();
    for (record, vector) in docs.into_iter().zip(vectors) {
        index.upsert(record, vector);
    }
    Retriever::new(index, Box::new(ByteEmbedder))
}

#[tokio::test]
async fn full_turn_produces_answer_with_usage() {
    let retriever = indexed_retriever().await;

    let context = retriever.retrieve("X, what is it?", 2).await.unwrap();
    assert_eq!(context.len(), 2);
    // "X is a widget." embeds closest to a query starting with 'X'.
    assert_eq!(context[0].source_file, "widgets.txt");

    let messages = prompt::build_messages(
        "You are a helpful document search assistant.",
        "CONTEXT {data}. QUERY {query}.",
        &context,
        "X, what is it?",
    )
    .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::System);
    assert!(messages[1].content.contains("X is a widget."));
    assert!(messages[1].content.contains("widgets.txt"));

    let mut source = ScriptedSource(VecDeque::from(vec![
        StreamChunk::content("X "),
        StreamChunk::content("is "),
        StreamChunk::content("a "),
        StreamChunk::content("widget."),
        StreamChunk::with_usage(20, 4, 24),
    ]));

    let (text, usage) = consume(&mut source, Instant::now(), &mut NullRenderer)
        .await
        .unwrap();

    assert!(text.starts_with("TTFT:"));
    assert!(text.contains("X is a widget."));
    assert!(text.contains("### Usage statistics:"));
    assert!(text.contains("prompt_tokens: 20"));
    assert!(text.contains("completion_tokens: 4"));
    assert!(text.contains("total_tokens: 24"));
    assert!(!text.contains(TEXT_CURSOR));

    let usage = usage.expect("usage summary");
    assert_eq!(usage.total_tokens, 24);
    assert!(usage.time_to_first_token_seconds >= 0.0);
}

#[tokio::test]
async fn empty_index_still_yields_a_valid_prompt() {
    let retriever = Retriever::new(VectorIndex::new(), Box::new(ByteEmbedder));
    let context = retriever.retrieve("anything", 5).await.unwrap();
    assert!(context.is_empty());

    let messages = prompt::build_messages(
        "sys",
        "CONTEXT {data}. QUERY {query}.",
        &context,
        "anything",
    )
    .unwrap();
    assert!(messages[1].content.contains("CONTEXT []"));
}
