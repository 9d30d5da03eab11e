//! # doctalk
//!
//! Retrieval-augmented chat over your local documents.
//!
//! doctalk indexes a directory of documents (text, Markdown, CSV, PDF, DOCX,
//! EPUB, Jupyter notebooks, HTML) into an in-memory vector index, retrieves
//! the most relevant documents for each question by cosine similarity, and
//! streams an answer from a Llama3 model behind an OpenAI-compatible
//! completions endpoint — optionally spawning and supervising that server as
//! a local child process.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌─────────────┐
//! │  Loader   │──▶│   Embedder    │──▶│ VectorIndex  │
//! │ fs + glob │   │ local/remote │   │  (cosine)   │
//! └───────────┘   └──────────────┘   └──────┬──────┘
//!                                           │ top-k
//!                                           ▼
//!                  ┌──────────┐      ┌─────────────┐
//!                  │  Llama3  │◀────│   Prompt     │
//!                  │  server  │ SSE │  Assembler   │
//!                  └────┬─────┘      └─────────────┘
//!                       ▼
//!                ┌──────────────┐
//!                │  Aggregator  │  TTFT + usage accounting
//!                └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! doctalk index                 # scan and embed ./ragdata
//! doctalk ask "What is X?"      # one-shot question
//! doctalk chat                  # interactive REPL
//! doctalk serve                 # run the inference server in the foreground
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and wire formats |
//! | [`loader`] | Filesystem document scanning |
//! | [`extract`] | Text extraction per document format |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | In-memory cosine vector index |
//! | [`retriever`] | Index building and top-k retrieval |
//! | [`prompt`] | Two-message prompt assembly |
//! | [`completion`] | Streaming chat-completion client |
//! | [`stream`] | Response aggregation, TTFT and usage accounting |
//! | [`session`] | Chat history and per-turn driver |
//! | [`server`] | Local inference server lifecycle |
//! | [`progress`] | Index-build progress reporting |

pub mod completion;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod loader;
pub mod models;
pub mod progress;
pub mod prompt;
pub mod retriever;
pub mod server;
pub mod session;
pub mod stream;
