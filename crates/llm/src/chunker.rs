//! Context Chunker
//!
//! Splits oversized text into bounded chunks and reduces them to a running
//! list of per-chunk summaries.
//!
//! Each chunk is summarized independently against the user's goal; no
//! summary is carried from one chunk into the next.

use orchestrator_core::Message;

use crate::engine::ModelSession;
use crate::types::{AskOptions, ChatRequest, LlmResult};

/// Character budget per chunk for server-backed models.
pub const SERVER_CHUNK_CHARS: usize = 8_000;

/// Token budget per chunk for embedded models.
pub const EMBEDDED_CHUNK_TOKENS: usize = 2_000;

const PARAGRAPH_BREAK: &str = "\n\n";
const REASONING_END: &str = "</think>";

// ---------------------------------------------------------------------------
// Splitting
// ---------------------------------------------------------------------------

/// Greedy split into chunks of at most `max_chars` bytes.
///
/// A chunk ends just after the last paragraph break in the back half of its
/// window when there is one, otherwise at the hard budget (on a char
/// boundary). Chunks keep their trailing break, so concatenating them yields
/// `text`.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = floor_char_boundary(text, (start + max_chars).min(text.len()));
        if end <= start {
            end = ceil_char_boundary(text, start + 1);
        }

        if end < text.len() {
            let window = end - start;
            if let Some(rel) = text[start..end].rfind(PARAGRAPH_BREAK) {
                if rel > 0 && rel >= window / 2 {
                    end = start + rel + PARAGRAPH_BREAK.len();
                }
            }
        }

        chunks.push(text[start..end].to_string());
        start = end;
    }

    chunks
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx.min(text.len())
}

/// Drop everything up to and including a `</think>` marker.
pub fn strip_reasoning(text: &str) -> &str {
    match text.find(REASONING_END) {
        Some(pos) => &text[pos + REASONING_END.len()..],
        None => text,
    }
}

/// Prompt asking for the summary of one chunk.
pub fn chunk_prompt(index: usize, total: usize, goal: &str, chunk: &str) -> String {
    format!(
        "You are reading part {index}/{total} of a document.\n\n\
         The user's goal is:\n{goal}\n\n\
         Here is the next part:\n\n{chunk}\n\n\
         Summarize key details that are relevant to the user's goal.\n\
         If nothing is relevant, respond briefly.\n\
         Be concise, memory is limited."
    )
}

// ---------------------------------------------------------------------------
// ContextChunker
// ---------------------------------------------------------------------------

/// Splits and reduces text against a unit budget (tokens or characters,
/// depending on what the session counts).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextChunker {
    max_units: usize,
}

impl ContextChunker {
    pub fn new(max_units: usize) -> Self {
        Self {
            max_units: max_units.max(1),
        }
    }

    pub fn max_units(&self) -> usize {
        self.max_units
    }

    /// Split where the budget is in characters.
    pub fn split(&self, text: &str) -> Vec<String> {
        split_into_chunks(text, self.max_units)
    }

    /// Split where the budget is in units measured by `measure`.
    ///
    /// The unit budget is converted to characters with the text's overall
    /// chars-per-unit ratio; each chunk is re-measured during reduction.
    pub fn split_measured(&self, text: &str, measure: impl Fn(&str) -> usize) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        let total_units = measure(text);
        if total_units <= self.max_units {
            return vec![text.to_string()];
        }
        let max_chars = (self.max_units as u128 * text.len() as u128 / total_units as u128) as usize;
        split_into_chunks(text, max_chars.max(1))
    }

    /// Summarize each chunk against `goal` and join the summaries in order.
    ///
    /// Stops early, returning what has been summarized so far, when a chunk
    /// prompt measures more than twice the budget.
    pub async fn reduce(
        &self,
        session: &dyn ModelSession,
        chunks: &[String],
        goal: &str,
    ) -> LlmResult<String> {
        let total = chunks.len();
        let mut summaries: Vec<String> = Vec::with_capacity(total);

        for (idx, chunk) in chunks.iter().enumerate() {
            let prompt = chunk_prompt(idx + 1, total, goal, chunk);
            let units = session.count_units(&prompt);
            if units > self.max_units * 2 {
                tracing::error!(
                    "Chunk {}/{} measures {} units (budget {}), stopping reduction early",
                    idx + 1,
                    total,
                    units,
                    self.max_units
                );
                break;
            }

            tracing::debug!("Summarizing chunk {}/{} ({} units)", idx + 1, total, units);
            let request = ChatRequest::new(&[Message::user(prompt)], &AskOptions::summary());
            let response = session.complete(&request).await?;
            let summary = strip_reasoning(response.content_text()).trim();
            summaries.push(format!("[Part {} Summary]\n{}", idx + 1, summary));
        }

        Ok(summaries.join("\n\n"))
    }
}
