//! Core data types for the retrieval and chat pipeline.
//!
//! These types flow between the indexer, the retriever, the prompt assembler,
//! and the streaming aggregator. Wire-facing types (`ChatMessage`,
//! `StreamChunk`, `Usage`) mirror the OpenAI chat-completions schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A document loaded from the data directory, ready for embedding.
///
/// Created once at indexing time and owned by the vector index thereafter.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    /// Stable id, the path relative to the data directory root.
    pub id: String,
    /// Full extracted text.
    pub text: String,
    /// Originating file name (not the full path), used for citations.
    pub source_file: String,
    /// Filesystem modification time.
    pub modified: DateTime<Utc>,
    /// SHA-256 of `text`, used to skip duplicate content at index time.
    pub content_hash: String,
}

/// One retrieved passage paired with its source file name.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextEntry {
    pub text: String,
    pub source_file: String,
}

/// Ordered retrieval result, most similar first. Length never exceeds the
/// configured top-K; empty when the index holds no documents.
pub type RetrievedContext = Vec<ContextEntry>;

/// Message role for the chat-completions API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message sent to the completion service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Token usage record attached to a streamed chunk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Incremental content delta inside a streamed choice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// One choice entry in a streamed chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: Delta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// A unit received from the completion stream.
///
/// May carry incremental text, a usage record, both, or neither (heartbeat
/// chunks have empty `choices` and no usage).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl StreamChunk {
    /// Convenience constructor for a content-bearing chunk.
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            choices: vec![StreamChoice {
                delta: Delta {
                    role: None,
                    content: Some(text.into()),
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    /// Convenience constructor for a usage-only chunk.
    pub fn with_usage(prompt: u64, completion: u64, total: u64) -> Self {
        Self {
            choices: Vec::new(),
            usage: Some(Usage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: total,
            }),
        }
    }
}

/// Final per-turn accounting, computed at most once per turn.
#[derive(Debug, Clone, Copy)]
pub struct UsageSummary {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub total_time_seconds: f64,
    /// `None` when total time was zero (rate unavailable, never a division fault).
    pub tokens_per_second: Option<f64>,
    pub time_to_first_token_seconds: f64,
}
