//! Single-prompt text generation clients.

use std::future::Future;

use crate::error::GenerationError;

mod gemini;
mod openai;

pub use gemini::{GeminiGenerator, DEFAULT_GEMINI_GENERATION_MODEL};
pub use openai::{OpenAiGenerator, DEFAULT_OPENAI_CHAT_MODEL};

/// Sampling settings shared by every provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens; the provider default when unset.
    ///
    /// Thinking models count reasoning tokens against this cap, so a tight
    /// value can cut the answer before its source directive.
    pub max_output_tokens: Option<u32>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_output_tokens: None,
        }
    }
}

/// Answers a single prompt with free text.
pub trait Generator: Send + Sync {
    /// Sends `prompt` and returns the model's raw text, possibly empty.
    fn generate(
        &self,
        prompt: &str,
    ) -> impl Future<Output = Result<String, GenerationError>> + Send;
}

/// Runtime-selected generation provider.
pub enum AnyGenerator {
    /// Gemini `generateContent`.
    Gemini(GeminiGenerator),
    /// OpenAI-compatible chat completions.
    OpenAi(OpenAiGenerator),
}

impl AnyGenerator {
    /// Provider name for logs.
    pub fn provider(&self) -> &'static str {
        match self {
            Self::Gemini(_) => "gemini",
            Self::OpenAi(_) => "openai",
        }
    }
}

impl Generator for AnyGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        match self {
            Self::Gemini(inner) => inner.generate(prompt).await,
            Self::OpenAi(inner) => inner.generate(prompt).await,
        }
    }
}
