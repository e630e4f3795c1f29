//! Context block and prompt rendering.

use super::RetrievalSet;
use crate::store::RetrievedChunk;

/// Sentence the model must use when the context does not contain the answer.
pub const FALLBACK_ANSWER: &str = "I don't know based on the document.";

/// Answer substituted when the model returns no text at all.
pub const NO_RESPONSE: &str = "No response generated.";

/// Characters of chunk content kept in a citation snippet.
pub const SNIPPET_CHARS: usize = 200;

/// Answering contract placed ahead of the context.
pub const SYSTEM_INSTRUCTION: &str = "You are a helpful AI assistant.\n\
Answer the question using ONLY the provided context.\n\
If the answer is not in the context, say:\n\
'I don't know based on the document.'\n\
Always include page numbers in your text when possible.\n\n\
IMPORTANT: At the very end of your response, list the chunk indices you actually used \
in this exact format: SOURCES: [0, 2]";

/// Renders one `CHUNK [i]: (Page p)` block.
pub fn render_chunk(chunk: &RetrievedChunk) -> String {
    let page = chunk
        .page_number()
        .map(|page| page.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!("CHUNK [{}]: (Page {page})\n{}", chunk.index, chunk.content)
}

/// Joins every chunk block with a blank line, in rank order.
pub fn render_context(set: &RetrievalSet) -> String {
    set.iter().map(render_chunk).collect::<Vec<_>>().join("\n\n")
}

/// Full prompt: contract, then context, then the question.
pub fn build_prompt(context: &str, question: &str) -> String {
    format!("{SYSTEM_INSTRUCTION}\n\nContext:\n{context}\n\nQuestion: {question}\n")
}

/// First [`SNIPPET_CHARS`] characters of `content` followed by `...`.
pub fn snippet(content: &str) -> String {
    let mut out: String = content.chars().take(SNIPPET_CHARS).collect();
    out.push_str("...");
    out
}
