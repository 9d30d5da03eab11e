//! Local llama inference server lifecycle.
//!
//! Spawns the MAX pipeline server as a child process, watches its merged
//! stdout/stderr for the readiness or fatal-error markers, and kills the
//! child when the handle is dropped. Also handles downloading the GGUF model
//! file the server needs.

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::config::LlmConfig;

/// Line the server prints when it is accepting connections.
pub const READY_MARKER: &str = "Listening on port 8000!";

/// Prefix of a fatal startup error from the pipeline runtime.
pub const ERROR_PREFIX: &str = "mojo: error:";

/// Classification of one line of server output during startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupEvent {
    Ready,
    Fatal(String),
    Info(String),
}

pub fn classify_line(line: &str) -> StartupEvent {
    let trimmed = line.trim();
    if trimmed == READY_MARKER {
        StartupEvent::Ready
    } else if trimmed.starts_with(ERROR_PREFIX) {
        StartupEvent::Fatal(trimmed.to_string())
    } else {
        StartupEvent::Info(trimmed.to_string())
    }
}

/// Receives startup status lines (model download, server boot progress).
pub trait StatusReporter: Send + Sync {
    fn status(&self, message: &str);
}

/// Startup status on stderr, keeping stdout for answer text.
pub struct StderrStatus;

impl StatusReporter for StderrStatus {
    fn status(&self, message: &str) {
        eprintln!("server  {}", message);
    }
}

pub struct NullStatus;

impl StatusReporter for NullStatus {
    fn status(&self, _message: &str) {}
}

/// Running inference server child process. Killed on drop.
pub struct LlamaServer {
    child: Child,
}

impl LlamaServer {
    /// Spawn the pipeline server and wait until it reports readiness.
    ///
    /// Stderr is merged into stdout so fatal runtime errors are seen by the
    /// same line classifier. Startup is bounded by
    /// `config.startup_timeout_secs`; model compilation on first run can take
    /// several minutes.
    pub async fn start(config: &LlmConfig, reporter: &dyn StatusReporter) -> Result<Self> {
        let model_path = config.resolved_model_path()?;

        let mut command = Command::new("mojo");
        command
            .arg("run")
            .arg(&config.pipeline_script)
            .arg("llama3")
            .arg("--max-length")
            .arg(config.max_tokens.to_string())
            .arg("--model-path")
            .arg(&model_path)
            .arg("--prompt")
            .arg("start")
            .arg("--quantization-encoding")
            .arg(&config.quantization)
            .arg("--temperature")
            .arg(config.temperature.to_string())
            .arg("--min-p")
            .arg(config.min_p.to_string());

        if let Some(custom_ops) = &config.custom_ops_path {
            command.arg("--custom-ops-path").arg(custom_ops);
        }
        if let Some(tokenizer) = &config.tokenizer_path {
            command.arg("--tokenizer-path").arg(tokenizer);
        }

        command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        reporter.status("Starting Llama3...");
        let mut child = command
            .spawn()
            .context("Failed to spawn 'mojo run'; is mojo on PATH?")?;

        let stdout = child
            .stdout
            .take()
            .context("Server child process has no stdout")?;
        let stderr = child
            .stderr
            .take()
            .context("Server child process has no stderr")?;

        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();

        let startup = async {
            loop {
                let line = tokio::select! {
                    line = stdout_lines.next_line() => line,
                    line = stderr_lines.next_line() => line,
                };
                match line.context("Error reading server output")? {
                    Some(line) => match classify_line(&line) {
                        StartupEvent::Ready => {
                            reporter.status("Llama3 is ready!");
                            return Ok(());
                        }
                        StartupEvent::Fatal(message) => {
                            bail!("Server failed to start: {}", message)
                        }
                        StartupEvent::Info(message) => {
                            if !message.is_empty() {
                                reporter.status(&message);
                            }
                        }
                    },
                    None => bail!("Server exited before becoming ready"),
                }
            }
        };

        let timeout = Duration::from_secs(config.startup_timeout_secs);
        match tokio::time::timeout(timeout, startup).await {
            Ok(result) => result?,
            Err(_) => {
                let _ = child.kill().await;
                bail!(
                    "Server did not become ready within {}s",
                    config.startup_timeout_secs
                );
            }
        }

        // Keep draining output after readiness so the child never blocks on a
        // full pipe.
        tokio::spawn(async move {
            while let Ok(Some(_)) = stdout_lines.next_line().await {}
        });
        tokio::spawn(async move {
            while let Ok(Some(_)) = stderr_lines.next_line().await {}
        });

        Ok(Self { child })
    }

    /// Stop the server, waiting for the child to exit.
    pub async fn shutdown(mut self) -> Result<()> {
        self.child.kill().await.context("Failed to kill server")?;
        Ok(())
    }
}

/// Make sure the GGUF model file exists locally, downloading it if missing.
///
/// The download streams to `<path>.partial` and renames on completion, so an
/// interrupted download never leaves a truncated model behind.
pub async fn ensure_model(config: &LlmConfig, reporter: &dyn StatusReporter) -> Result<()> {
    let path = config.resolved_model_path()?;
    if path.exists() {
        return Ok(());
    }

    let url = config.resolved_model_url()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create model directory {}", parent.display()))?;
    }

    reporter.status(&format!("Downloading model from {}", url));

    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("Model download request to {} failed", url))?;
    let status = response.status();
    if !status.is_success() {
        bail!("Model download from {} failed with {}", url, status);
    }

    let partial = PathBuf::from(format!("{}.partial", path.display()));
    let mut file = tokio::fs::File::create(&partial)
        .await
        .with_context(|| format!("Failed to create {}", partial.display()))?;

    let mut body = response.bytes_stream();
    let mut downloaded = 0u64;
    let mut last_reported = 0u64;
    while let Some(bytes) = body.next().await {
        let bytes = bytes.context("Error reading model download stream")?;
        tokio::io::copy(&mut bytes.as_ref(), &mut file)
            .await
            .context("Error writing model file")?;
        downloaded += bytes.len() as u64;
        // One status line per 256 MiB keeps multi-GB downloads visible
        // without flooding stderr.
        if downloaded - last_reported >= 256 * 1024 * 1024 {
            reporter.status(&format!("Downloaded {} MiB", downloaded / (1024 * 1024)));
            last_reported = downloaded;
        }
    }

    tokio::fs::rename(&partial, &path)
        .await
        .with_context(|| format!("Failed to move {} into place", partial.display()))?;
    reporter.status(&format!("Model saved to {}", path.display()));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_marker_matches_exactly() {
        assert_eq!(classify_line("Listening on port 8000!"), StartupEvent::Ready);
        assert_eq!(
            classify_line("  Listening on port 8000!  "),
            StartupEvent::Ready
        );
    }

    #[test]
    fn almost_ready_lines_are_info() {
        assert!(matches!(
            classify_line("Listening on port 8000"),
            StartupEvent::Info(_)
        ));
        assert!(matches!(
            classify_line("Now Listening on port 8000!"),
            StartupEvent::Info(_)
        ));
    }

    #[test]
    fn mojo_error_prefix_is_fatal() {
        match classify_line("mojo: error: unable to load model") {
            StartupEvent::Fatal(message) => {
                assert!(message.contains("unable to load model"));
            }
            other => panic!("expected fatal, got {:?}", other),
        }
    }

    #[test]
    fn other_output_is_info() {
        assert!(matches!(
            classify_line("Compiling graph..."),
            StartupEvent::Info(_)
        ));
        assert!(matches!(classify_line(""), StartupEvent::Info(_)));
    }
}
