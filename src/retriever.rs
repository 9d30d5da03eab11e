//! Index building and nearest-neighbor retrieval.
//!
//! [`build_retriever`] runs the indexing pipeline once per process: scan the
//! data directory, embed every document, and load the in-memory vector index.
//! The resulting [`Retriever`] owns both the index and the embedder so query
//! embeddings are guaranteed to come from the same model as index embeddings.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::embedding::{self, Embedder};
use crate::index::VectorIndex;
use crate::loader;
use crate::models::{ContextEntry, RetrievedContext};
use crate::progress::{IndexProgressEvent, ProgressReporter};

/// Read-only query handle over the indexed documents.
pub struct Retriever {
    index: VectorIndex,
    embedder: Box<dyn Embedder>,
}

/// Counters reported by `doctalk index`.
#[derive(Debug, Clone, Copy)]
pub struct IndexStats {
    pub documents_indexed: usize,
    pub duplicates_skipped: usize,
}

impl Retriever {
    pub fn new(index: VectorIndex, embedder: Box<dyn Embedder>) -> Self {
        Self { index, embedder }
    }

    pub fn document_count(&self) -> usize {
        self.index.len()
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    pub fn dims(&self) -> usize {
        self.embedder.dims()
    }

    /// Return the `top_k` most similar documents to `query`, most similar
    /// first. An empty index yields an empty context; downstream prompt
    /// assembly handles that case.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<RetrievedContext> {
        if query.trim().is_empty() {
            bail!("Query must not be empty");
        }
        if !(1..=7).contains(&top_k) {
            bail!("top_k must be in [1, 7], got {}", top_k);
        }
        if self.index.is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = embedding::embed_query(self.embedder.as_ref(), query).await?;

        Ok(self
            .index
            .query(&query_vec, top_k)
            .into_iter()
            .map(|m| ContextEntry {
                text: m.text,
                source_file: m.source_file,
            })
            .collect())
    }
}

/// Scan, embed, and index the data directory, returning the query handle.
pub async fn build_retriever(
    config: &Config,
    reporter: &dyn ProgressReporter,
) -> Result<(Retriever, IndexStats)> {
    let embedder = embedding::create_embedder(&config.embedding)?;

    reporter.report(IndexProgressEvent::Scanning {
        dir: config.index.data_dir.display().to_string(),
    });
    let records = loader::scan_documents(&config.index)?;

    let mut index = VectorIndex::new();
    let mut duplicates_skipped = 0usize;
    let total = records.len() as u64;
    let mut embedded = 0u64;

    for batch in records.chunks(config.embedding.batch_size.max(1)) {
        // Duplicate content embeds identically; skip it outright.
        let fresh: Vec<_> = batch
            .iter()
            .filter(|r| {
                if index.contains_hash(&r.content_hash) {
                    duplicates_skipped += 1;
                    false
                } else {
                    true
                }
            })
            .cloned()
            .collect();

        if fresh.is_empty() {
            embedded += batch.len() as u64;
            reporter.report(IndexProgressEvent::Embedding { n: embedded, total });
            continue;
        }

        let texts: Vec<String> = fresh.iter().map(|r| r.text.clone()).collect();
        let vectors = embedder.embed(&texts).await?;
        if vectors.len() != fresh.len() {
            bail!(
                "Embedding count mismatch: {} texts, {} vectors",
                fresh.len(),
                vectors.len()
            );
        }

        for (record, vector) in fresh.into_iter().zip(vectors) {
            index.upsert(record, vector);
        }

        embedded += batch.len() as u64;
        reporter.report(IndexProgressEvent::Embedding { n: embedded, total });
    }

    let stats = IndexStats {
        documents_indexed: index.len(),
        duplicates_skipped,
    };

    Ok((Retriever::new(index, embedder), stats))
}
