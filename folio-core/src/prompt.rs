//! Grounded prompt assembly.
//!
//! The contract that keeps answers grounded: the model is restricted to
//! numbered context blocks, must answer with [`REFUSAL`] verbatim when
//! the context cannot support an answer, and every block has a matching
//! structured citation so callers can check sources without parsing
//! answer prose.

use serde::{Deserialize, Serialize};

use crate::ollama::ChatMessage;
use crate::retriever::RetrievedChunk;

/// The exact line a model must answer with when the context is
/// insufficient. Detected programmatically; any rewording breaks that.
pub const REFUSAL: &str = "I don't know from these PDFs.";

/// System instruction for answer models.
pub const SYSTEM_PROMPT: &str = "You are a helpful assistant. Use ONLY the provided context to answer.\n\
If the needed info is not present in the context, respond EXACTLY with: \"I don't know from these PDFs.\"\n\
Do not include outside knowledge or guesses.";

/// Snippet length in characters for citations.
const SNIPPET_CHARS: usize = 320;

/// One numbered source reference, parallel to a context block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub n: usize,
    pub doc: String,
    pub page: u32,
    pub path: String,
    pub snippet: String,
}

/// An assembled prompt and its parallel citation list.
#[derive(Debug, Clone)]
pub struct GroundedPrompt {
    pub messages: Vec<ChatMessage>,
    pub citations: Vec<Citation>,
}

/// Build the grounded message set for a question over retrieved chunks.
///
/// Context block `n` is labeled `[n] <doc> p.<page>` and citation `n`
/// describes the same chunk.
pub fn assemble(question: &str, retrieved: &[RetrievedChunk]) -> GroundedPrompt {
    let mut blocks = Vec::with_capacity(retrieved.len());
    let mut citations = Vec::with_capacity(retrieved.len());

    for (i, hit) in retrieved.iter().enumerate() {
        let n = i + 1;
        let meta = &hit.record.meta;
        let text = hit.record.text.trim();
        blocks.push(format!("[{n}] {} p.{}:\n{}", meta.doc, meta.page, text));
        citations.push(Citation {
            n,
            doc: meta.doc.clone(),
            page: meta.page,
            path: meta.path.clone(),
            snippet: snippet(text),
        });
    }

    let user = format!(
        "Question: {question}\n\nContext blocks:\n\n{}",
        blocks.join("\n\n")
    );
    GroundedPrompt {
        messages: vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(user),
        ],
        citations,
    }
}

/// First 320 characters of the text, with a truncation marker when
/// longer.
fn snippet(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(SNIPPET_CHARS).collect();
    if chars.next().is_some() {
        head + "…"
    } else {
        head
    }
}
