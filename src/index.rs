//! In-memory vector index over whole documents.
//!
//! Brute-force cosine similarity over all stored vectors, which is plenty for
//! a local data directory. Built fresh per process run and handed to the
//! [`Retriever`](crate::retriever::Retriever) by explicit handle.

use crate::embedding::cosine_similarity;
use crate::models::DocumentRecord;

struct IndexEntry {
    doc: DocumentRecord,
    vector: Vec<f32>,
}

/// A scored match returned from [`VectorIndex::query`].
#[derive(Debug, Clone)]
pub struct Match {
    pub text: String,
    pub source_file: String,
    pub score: f32,
}

/// Brute-force cosine index keyed by document id.
#[derive(Default)]
pub struct VectorIndex {
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a document with its embedding, replacing any entry with the
    /// same id.
    pub fn upsert(&mut self, doc: DocumentRecord, vector: Vec<f32>) {
        self.entries.retain(|e| e.doc.id != doc.id);
        self.entries.push(IndexEntry { doc, vector });
    }

    /// Return up to `top_k` matches ordered by descending cosine similarity.
    /// An empty index yields an empty result.
    pub fn query(&self, query_vec: &[f32], top_k: usize) -> Vec<Match> {
        let mut matches: Vec<Match> = self
            .entries
            .iter()
            .map(|e| Match {
                text: e.doc.text.clone(),
                source_file: e.doc.source_file.clone(),
                score: cosine_similarity(query_vec, &e.vector),
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);
        matches
    }

    /// True if a document with this content hash is already indexed.
    pub fn contains_hash(&self, content_hash: &str) -> bool {
        self.entries.iter().any(|e| e.doc.content_hash == content_hash)
    }
}
