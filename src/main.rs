//! # doctalk CLI
//!
//! Retrieval-augmented chat over your local documents, answered by a Llama3
//! model behind an OpenAI-compatible completions endpoint.
//!
//! ## Usage
//!
//! ```bash
//! doctalk --config ./config/doctalk.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `doctalk index` | Scan and embed the data directory, reporting counts |
//! | `doctalk ask "<query>"` | Answer one question and exit |
//! | `doctalk chat` | Interactive question/answer loop |
//! | `doctalk serve` | Run the local inference server in the foreground |
//!
//! ## Examples
//!
//! ```bash
//! # Verify the data directory indexes cleanly
//! doctalk index --config ./config/doctalk.toml
//!
//! # One-shot question (starts the local server if configured to)
//! doctalk ask "How do I configure retries?"
//!
//! # Interactive chat
//! doctalk chat
//!
//! # Just the inference server, e.g. for use from another tool
//! doctalk serve
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{BufRead, Write};
use std::path::PathBuf;

use doctalk::completion::CompletionClient;
use doctalk::config::{self, Config};
use doctalk::progress::ProgressMode;
use doctalk::retriever::{self, Retriever};
use doctalk::server::{ensure_model, LlamaServer, NullStatus, StatusReporter, StderrStatus};
use doctalk::session::{run_turn, ChatSession, TerminalRenderer, ASSISTANT_AVATAR, USER_AVATAR};

/// doctalk — retrieval-augmented chat over your local documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/doctalk.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "doctalk",
    about = "Retrieval-augmented chat over your local documents via a Llama3 server",
    version,
    long_about = "doctalk indexes a directory of documents into an in-memory vector index, \
    retrieves the most relevant ones for each question by cosine similarity, and streams an \
    answer from a Llama3 model behind an OpenAI-compatible completions endpoint, optionally \
    spawning that server as a local child process."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/doctalk.toml`. Index, embedding, retrieval, and
    /// server settings are read from this file.
    #[arg(long, global = true, default_value = "./config/doctalk.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` when stderr is a
    /// terminal, `off` otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressFlag>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressFlag {
    Off,
    Human,
    Json,
}

impl ProgressFlag {
    fn mode(flag: Option<Self>) -> ProgressMode {
        match flag {
            Some(ProgressFlag::Off) => ProgressMode::Off,
            Some(ProgressFlag::Human) => ProgressMode::Human,
            Some(ProgressFlag::Json) => ProgressMode::Json,
            None => ProgressMode::default_for_tty(),
        }
    }
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Scan and embed the data directory.
    ///
    /// Walks the configured data directory, extracts text from every
    /// supported file, embeds the documents, and reports how many were
    /// indexed. Useful for verifying the data directory before chatting.
    Index,

    /// Answer one question and exit.
    ///
    /// Indexes the data directory, retrieves the most relevant documents,
    /// and streams the answer (with TTFT and usage statistics) to stdout.
    /// Starts the local inference server first when the config says to.
    Ask {
        /// The question to answer.
        query: String,

        /// Override the number of documents retrieved as context (1-7).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Interactive question/answer loop.
    ///
    /// Indexes once, then reads questions from stdin until EOF or an
    /// `exit`/`quit` line. Each turn retrieves fresh context; earlier turns
    /// are kept as a transcript but never sent back to the model.
    Chat {
        /// Override the number of documents retrieved as context (1-7).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Run the local inference server in the foreground.
    ///
    /// Downloads the model if needed, starts the server, and keeps it
    /// running until Ctrl-C. Useful when other tools want to share one
    /// server instance.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let progress = ProgressFlag::mode(cli.progress);

    match cli.command {
        Commands::Index => {
            let reporter = progress.reporter();
            let (retriever, stats) = retriever::build_retriever(&cfg, reporter.as_ref()).await?;
            println!(
                "Indexed {} documents ({} duplicates skipped) with {} ({} dims).",
                stats.documents_indexed,
                stats.duplicates_skipped,
                retriever.model_name(),
                retriever.dims()
            );
        }
        Commands::Ask { query, top_k } => {
            let cfg = with_top_k(cfg, top_k)?;
            let _server = maybe_start_server(&cfg, progress).await?;
            let retriever = build(&cfg, progress).await?;
            let client = CompletionClient::new(&cfg.llm)?;
            let mut session = ChatSession::new();
            let mut renderer = TerminalRenderer::new();
            run_turn(
                &mut session,
                &retriever,
                &client,
                &cfg,
                &query,
                &mut renderer,
            )
            .await?;
            println!();
        }
        Commands::Chat { top_k } => {
            let cfg = with_top_k(cfg, top_k)?;
            let _server = maybe_start_server(&cfg, progress).await?;
            let retriever = build(&cfg, progress).await?;
            let client = CompletionClient::new(&cfg.llm)?;
            chat_loop(&cfg, &retriever, &client).await?;
        }
        Commands::Serve => {
            let reporter = status_reporter(progress);
            ensure_model(&cfg.llm, reporter.as_ref()).await?;
            let server = LlamaServer::start(&cfg.llm, reporter.as_ref()).await?;
            println!("Server ready on {} (Ctrl-C to stop).", cfg.llm.base_url);
            tokio::signal::ctrl_c().await?;
            server.shutdown().await?;
        }
    }

    Ok(())
}

fn with_top_k(mut cfg: Config, top_k: Option<usize>) -> Result<Config> {
    if let Some(top_k) = top_k {
        if !(1..=7).contains(&top_k) {
            bail!("--top-k must be in [1, 7], got {}", top_k);
        }
        cfg.retrieval.top_k = top_k;
    }
    Ok(cfg)
}

fn status_reporter(progress: ProgressMode) -> Box<dyn StatusReporter> {
    match progress {
        ProgressMode::Off => Box::new(NullStatus),
        _ => Box::new(StderrStatus),
    }
}

async fn maybe_start_server(
    cfg: &Config,
    progress: ProgressMode,
) -> Result<Option<LlamaServer>> {
    if !cfg.llm.start_local_server {
        return Ok(None);
    }
    let reporter = status_reporter(progress);
    ensure_model(&cfg.llm, reporter.as_ref()).await?;
    let server = LlamaServer::start(&cfg.llm, reporter.as_ref()).await?;
    Ok(Some(server))
}

async fn build(cfg: &Config, progress: ProgressMode) -> Result<Retriever> {
    let reporter = progress.reporter();
    let (retriever, stats) = retriever::build_retriever(cfg, reporter.as_ref()).await?;
    eprintln!("Data is indexed ({} documents).", stats.documents_indexed);
    Ok(retriever)
}

async fn chat_loop(cfg: &Config, retriever: &Retriever, client: &CompletionClient) -> Result<()> {
    let mut session = ChatSession::new();
    let stdin = std::io::stdin();
    let mut stderr = std::io::stderr();

    loop {
        write!(stderr, "{} ", USER_AVATAR)?;
        stderr.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query == "exit" || query == "quit" {
            break;
        }

        write!(stderr, "{} ", ASSISTANT_AVATAR)?;
        stderr.flush()?;
        let mut renderer = TerminalRenderer::new();
        match run_turn(&mut session, retriever, client, cfg, query, &mut renderer).await {
            Ok(_) => println!(),
            Err(e) => eprintln!("error: {:#}", e),
        }
    }

    Ok(())
}
