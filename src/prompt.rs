//! Prompt assembly for a retrieval-augmented turn.
//!
//! Each turn sends exactly two messages: the system prompt verbatim and a
//! user message built from a fixed template with the serialized retrieved
//! context and the query substituted in.

use anyhow::{bail, Result};

use crate::models::{ChatMessage, RetrievedContext};

/// Serialize retrieved context as a list of `(text, source)` pairs.
///
/// An empty context serializes as `[]`; the assistant is still asked to
/// answer and is expected to reply that it does not know.
pub fn serialize_context(context: &RetrievedContext) -> String {
    let mut out = String::from("[");
    for (i, entry) in context.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&format!("({:?}, {:?})", entry.text, entry.source_file));
    }
    out.push(']');
    out
}

/// Substitute `{data}` and `{query}` into the QA template.
///
/// A template missing either placeholder is a programming error and fails
/// immediately; config validation catches this at load time.
pub fn render_template(template: &str, data: &str, query: &str) -> Result<String> {
    if !template.contains("{data}") {
        bail!("QA template is missing the {{data}} placeholder");
    }
    if !template.contains("{query}") {
        bail!("QA template is missing the {{query}} placeholder");
    }
    Ok(template.replace("{data}", data).replace("{query}", query))
}

/// Build the two-message prompt for one turn.
pub fn build_messages(
    system_prompt: &str,
    qa_template: &str,
    context: &RetrievedContext,
    query: &str,
) -> Result<Vec<ChatMessage>> {
    let data = serialize_context(context);
    let user_content = render_template(qa_template, &data, query)?;
    Ok(vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(user_content),
    ])
}
