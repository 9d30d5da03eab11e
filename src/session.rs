//! Chat session state and the per-turn driver.
//!
//! History is append-only display state. It is never sent back to the model:
//! every turn's prompt is exactly the system message plus the templated user
//! message for that turn.

use anyhow::Result;
use std::io::Write;
use std::time::Instant;

use crate::completion::CompletionClient;
use crate::config::Config;
use crate::models::{Role, UsageSummary};
use crate::prompt;
use crate::retriever::Retriever;
use crate::stream::{self, Renderer, TEXT_CURSOR};

pub const USER_AVATAR: &str = "💬";
pub const ASSISTANT_AVATAR: &str = "🦙";

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub role: Role,
    pub avatar: &'static str,
    pub content: String,
}

/// Append-only transcript of a chat session.
#[derive(Default)]
pub struct ChatSession {
    history: Vec<HistoryEntry>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.history.push(HistoryEntry {
            role: Role::User,
            avatar: USER_AVATAR,
            content: content.into(),
        });
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.history.push(HistoryEntry {
            role: Role::Assistant,
            avatar: ASSISTANT_AVATAR,
            content: content.into(),
        });
    }
}

/// Final result of one question/answer turn.
pub struct TurnOutcome {
    pub text: String,
    pub usage: Option<UsageSummary>,
}

/// Prints each frame's new suffix to stdout, dropping the transient cursor
/// marker (a terminal cannot repaint it the way a live widget can).
pub struct TerminalRenderer {
    printed: usize,
}

impl TerminalRenderer {
    pub fn new() -> Self {
        Self { printed: 0 }
    }
}

impl Default for TerminalRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for TerminalRenderer {
    fn render(&mut self, frame: &str) {
        let stored = frame.strip_suffix(TEXT_CURSOR).unwrap_or(frame);
        if stored.len() > self.printed {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(stored[self.printed..].as_bytes());
            let _ = stdout.flush();
            self.printed = stored.len();
        }
    }
}

/// Run one full turn: retrieve context, assemble the two-message prompt,
/// stream the completion, and record both sides in the session history.
pub async fn run_turn(
    session: &mut ChatSession,
    retriever: &Retriever,
    client: &CompletionClient,
    config: &Config,
    query: &str,
    renderer: &mut dyn Renderer,
) -> Result<TurnOutcome> {
    session.push_user(query);

    let context = retriever.retrieve(query, config.retrieval.top_k).await?;
    let messages = prompt::build_messages(
        &config.prompt.system,
        &config.prompt.qa_template,
        &context,
        query,
    )?;

    // TTFT is measured from request submission.
    let started_at = Instant::now();
    let mut source = client.stream_completion(&messages).await?;
    let (text, usage) = stream::consume(&mut source, started_at, renderer).await?;

    session.push_assistant(text.clone());

    Ok(TurnOutcome { text, usage })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_append_only_with_fixed_avatars() {
        let mut session = ChatSession::new();
        session.push_user("What is X?");
        session.push_assistant("X is a widget.");
        session.push_user("And Y?");

        let history = session.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].avatar, USER_AVATAR);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].avatar, ASSISTANT_AVATAR);
        assert_eq!(history[2].content, "And Y?");
    }

    #[test]
    fn terminal_renderer_prints_suffixes_without_cursor() {
        // Exercise the cursor-stripping path directly.
        let mut renderer = TerminalRenderer::new();
        renderer.render(&format!("hello{}", TEXT_CURSOR));
        assert_eq!(renderer.printed, "hello".len());
        renderer.render(&format!("hello world{}", TEXT_CURSOR));
        assert_eq!(renderer.printed, "hello world".len());
        // A shrinking frame never rewinds.
        renderer.render("hello");
        assert_eq!(renderer.printed, "hello world".len());
    }
}
