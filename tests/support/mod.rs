#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pagecite::{
    Embedder, EmbeddingError, EmbeddingIntent, ExtractionError, GenerationError, Generator,
    MemoryStore, PageExtractor, PageText, Pipeline, PipelineConfig,
};
use tokio::sync::Notify;

/// Keyword axes of the toy embedding space; the last axis catches everything else.
const KEYWORDS: [&str; 3] = ["paris", "rust", "ocean"];
pub const DIMENSION: usize = KEYWORDS.len() + 1;

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut vector: Vec<f32> = KEYWORDS
        .iter()
        .map(|word| if lower.contains(word) { 1.0 } else { 0.0 })
        .collect();
    let other = if vector.iter().all(|v| *v == 0.0) { 1.0 } else { 0.0 };
    vector.push(other);
    vector
}

/// Deterministic embedder that records every call.
#[derive(Default)]
pub struct KeywordEmbedder {
    pub calls: Mutex<Vec<(String, EmbeddingIntent)>>,
    pub fail_on: Option<String>,
    pub transient_failures: AtomicUsize,
    pub gate: Option<Gate>,
}

/// Pauses the embedder on a marker text until released.
pub struct Gate {
    pub marker: String,
    pub reached: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl KeywordEmbedder {
    pub fn intents(&self) -> Vec<EmbeddingIntent> {
        self.calls.lock().unwrap().iter().map(|(_, i)| *i).collect()
    }
}

impl Embedder for KeywordEmbedder {
    fn dimension(&self) -> usize {
        DIMENSION
    }

    async fn embed(
        &self,
        text: &str,
        intent: EmbeddingIntent,
    ) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.lock().unwrap().push((text.to_string(), intent));
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(EmbeddingError::Status {
                status: 503,
                body: "overloaded".into(),
            });
        }
        if let Some(marker) = &self.fail_on {
            if text.contains(marker.as_str()) {
                return Err(EmbeddingError::Status {
                    status: 400,
                    body: "rejected".into(),
                });
            }
        }
        if let Some(gate) = &self.gate {
            if text.contains(gate.marker.as_str()) {
                gate.reached.notify_one();
                gate.release.notified().await;
            }
        }
        Ok(keyword_vector(text))
    }
}

/// Generator that replies with a fixed text and keeps the prompts it saw.
pub struct ScriptedGenerator {
    pub reply: String,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Generator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.reply.clone())
    }
}

/// Reads a UTF-8 file and treats each form feed as a page break.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormFeedExtractor;

impl PageExtractor for FormFeedExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, ExtractionError> {
        let text = fs::read_to_string(path)
            .map_err(|err| ExtractionError::Task(format!("{}: {err}", path.display())))?;
        Ok(text
            .split('\x0c')
            .enumerate()
            .map(|(i, page)| PageText::new(i as u32 + 1, page))
            .collect())
    }
}

pub type TestPipeline = Pipeline<KeywordEmbedder, MemoryStore, ScriptedGenerator>;

pub fn pipeline_with(embedder: KeywordEmbedder, reply: &str) -> TestPipeline {
    Pipeline::new(
        embedder,
        MemoryStore::new(DIMENSION),
        ScriptedGenerator::new(reply),
        PipelineConfig::default(),
    )
    .expect("dimensions agree")
}

pub fn pipeline(reply: &str) -> TestPipeline {
    pipeline_with(KeywordEmbedder::default(), reply)
}

pub fn sample_pages() -> Vec<PageText> {
    vec![
        PageText::new(1, "Paris is the capital of France."),
        PageText::new(2, "Rust is a systems programming language."),
        PageText::new(3, "Paris also hosts the Louvre museum."),
    ]
}
