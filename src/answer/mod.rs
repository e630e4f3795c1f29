//! Grounded answer composition over one query's retrieved chunks.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::generator::Generator;
use crate::store::RetrievedChunk;

pub mod citations;
pub mod prompt;

pub use citations::{parse_response, resolve_citations, Directive, ParsedResponse};
pub use prompt::{build_prompt, render_context, snippet, FALLBACK_ANSWER, NO_RESPONSE};

/// Steps a query moves through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    /// Embedding the question.
    EmbedQuery,
    /// Nearest-neighbour search.
    Retrieve,
    /// Rendering retrieved chunks into a context block.
    BuildContext,
    /// The single generation call.
    Generate,
    /// Reading the source directive.
    ParseCitations,
    /// Answer assembled.
    Done,
}

impl QueryStage {
    /// Stable name used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmbedQuery => "embed_query",
            Self::Retrieve => "retrieve",
            Self::BuildContext => "build_context",
            Self::Generate => "generate",
            Self::ParseCitations => "parse_citations",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One query's ranked chunks. A citation index is an offset into this set and
/// means nothing outside it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalSet {
    chunks: Vec<RetrievedChunk>,
}

impl RetrievalSet {
    /// Wraps ranked chunks, renumbering `index` to match each chunk's offset.
    pub fn new(mut chunks: Vec<RetrievedChunk>) -> Self {
        for (offset, chunk) in chunks.iter_mut().enumerate() {
            chunk.index = offset;
        }
        Self { chunks }
    }

    /// Chunk at ephemeral index `index`.
    pub fn get(&self, index: usize) -> Option<&RetrievedChunk> {
        self.chunks.get(index)
    }

    /// Chunks in rank order.
    pub fn iter(&self) -> std::slice::Iter<'_, RetrievedChunk> {
        self.chunks.iter()
    }

    /// Number of retrieved chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True when retrieval found nothing above the floor.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Citation for the chunk at `index`, if any.
    pub fn citation(&self, index: usize) -> Option<Citation> {
        self.get(index).map(|chunk| Citation {
            page_number: chunk.page_number(),
            snippet: snippet(&chunk.content),
        })
    }

    /// Consumes the set.
    pub fn into_chunks(self) -> Vec<RetrievedChunk> {
        self.chunks
    }
}

/// Source page backing part of an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// 1-based page, `null` when the chunk carried none.
    pub page_number: Option<u32>,
    /// First characters of the cited chunk followed by `...`.
    pub snippet: String,
}

/// Final answer handed back to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    /// Model text with source directives removed.
    pub answer: String,
    /// Deduplicated citations in the order the model cited them.
    pub citations: Vec<Citation>,
}

/// Builds the prompt, calls the generator once, and reads its citations.
pub struct AnswerComposer<G> {
    generator: G,
    deadline: Option<Duration>,
}

impl<G: Generator> AnswerComposer<G> {
    /// Wraps a generator. `deadline` bounds the generation call when set.
    pub fn new(generator: G, deadline: Option<Duration>) -> Self {
        Self {
            generator,
            deadline,
        }
    }

    /// Underlying generator.
    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Runs BUILD_CONTEXT, GENERATE and PARSE_CITATIONS for `question`.
    ///
    /// An empty retrieval set still produces one generation call so the model
    /// can answer with the fallback sentence.
    pub async fn compose(
        &self,
        question: &str,
        set: &RetrievalSet,
    ) -> Result<Answer, GenerationError> {
        tracing::debug!(stage = %QueryStage::BuildContext, chunks = set.len());
        let context = render_context(set);
        let prompt = build_prompt(&context, question);

        tracing::debug!(stage = %QueryStage::Generate, prompt_chars = prompt.len());
        let raw = crate::pipeline::with_deadline(
            self.deadline,
            self.generator.generate(&prompt),
            GenerationError::Timeout,
        )
        .await?;
        let raw = if raw.trim().is_empty() {
            NO_RESPONSE.to_string()
        } else {
            raw
        };

        tracing::debug!(stage = %QueryStage::ParseCitations);
        let parsed = parse_response(&raw);
        let citations = match &parsed.directive {
            Directive::Absent | Directive::Empty => Vec::new(),
            Directive::Malformed { raw } => {
                tracing::warn!(directive = %raw, "unreadable source directive; answering without citations");
                Vec::new()
            }
            Directive::Indices(indices) => resolve_citations(indices, set),
        };
        tracing::debug!(stage = %QueryStage::Done, citations = citations.len());
        Ok(Answer {
            answer: parsed.answer,
            citations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ChunkMetadata;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct Scripted {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    impl Generator for Scripted {
        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    struct Stalled;

    impl Generator for Stalled {
        async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }

    fn retrieved(pages: &[u32]) -> RetrievalSet {
        RetrievalSet::new(
            pages
                .iter()
                .map(|page| RetrievedChunk {
                    index: 99,
                    content: format!("text from page {page}"),
                    metadata: ChunkMetadata::new(*page, 0),
                    similarity: 0.9,
                })
                .collect(),
        )
    }

    #[test]
    fn retrieval_set_renumbers_offsets() {
        let set = retrieved(&[4, 5]);
        let indices: Vec<usize> = set.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert!(set.citation(2).is_none());
    }

    #[tokio::test]
    async fn compose_parses_and_strips_citations() {
        let composer = AnswerComposer::new(
            Scripted::new("Paris is the capital.\nSOURCES: [0, 0, 2]"),
            None,
        );
        let set = retrieved(&[4, 7, 4]);
        let answer = composer.compose("Capital?", &set).await.unwrap();
        assert_eq!(
            answer,
            Answer {
                answer: "Paris is the capital.".into(),
                citations: vec![Citation {
                    page_number: Some(4),
                    snippet: "text from page 4...".into(),
                }],
            }
        );
        let prompts = composer.generator().prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("CHUNK [2]: (Page 4)\ntext from page 4"));
        assert!(prompts[0].ends_with("Question: Capital?\n"));
    }

    #[tokio::test]
    async fn empty_retrieval_still_calls_the_model() {
        let composer = AnswerComposer::new(Scripted::new(FALLBACK_ANSWER), None);
        let answer = composer
            .compose("Unrelated?", &RetrievalSet::default())
            .await
            .unwrap();
        assert_eq!(answer.answer, FALLBACK_ANSWER);
        assert!(answer.citations.is_empty());
        assert_eq!(composer.generator().prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn blank_model_output_is_replaced() {
        let composer = AnswerComposer::new(Scripted::new("   "), None);
        let answer = composer.compose("?", &retrieved(&[1])).await.unwrap();
        assert_eq!(answer.answer, NO_RESPONSE);
    }

    #[tokio::test]
    async fn malformed_directive_yields_no_citations() {
        let composer = AnswerComposer::new(Scripted::new("Answer.\nSOURCES: [abc]"), None);
        let answer = composer.compose("?", &retrieved(&[1])).await.unwrap();
        assert_eq!(answer.answer, "Answer.");
        assert!(answer.citations.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_is_a_generation_timeout() {
        let composer = AnswerComposer::new(Stalled, Some(Duration::from_secs(2)));
        let err = composer.compose("?", &retrieved(&[1])).await.unwrap_err();
        assert!(matches!(err, GenerationError::Timeout(d) if d == Duration::from_secs(2)));
    }

    #[test]
    fn citation_serializes_missing_page_as_null() {
        let citation = Citation {
            page_number: None,
            snippet: "x...".into(),
        };
        assert_eq!(
            serde_json::to_value(&citation).unwrap(),
            serde_json::json!({"page_number": null, "snippet": "x..."})
        );
    }
}
