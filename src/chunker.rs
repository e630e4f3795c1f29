//! Page-preserving text chunking for downstream embedding.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::store::ChunkMetadata;

/// Default window length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default number of characters carried over between adjacent windows.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Boundary levels tried coarsest first: paragraph, line, sentence, word.
/// A hard character cut follows the last level.
const BOUNDARY_LEVELS: &[&[&str]] = &[&["\n\n"], &["\n"], &[". ", "? ", "! "], &[" "]];

/// Plain text of a single PDF page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    /// 1-based page number in the source document.
    pub page_number: u32,
    /// Extracted page text.
    pub content: String,
}

impl PageText {
    /// Builds a page payload.
    pub fn new(page_number: u32, content: impl Into<String>) -> Self {
        Self {
            page_number,
            content: content.into(),
        }
    }
}

/// Bounded chunk of page text ready for embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextChunk {
    /// Trimmed chunk text.
    pub content: String,
    /// Page number and within-page index.
    pub metadata: ChunkMetadata,
}

/// Chunking tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Preferred maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters repeated from the end of one chunk at the start of the next.
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Stateless recursive splitter that never mixes text from different pages.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

impl Chunker {
    /// Builds a chunker, clamping the overlap below the chunk size.
    pub fn new(config: ChunkerConfig) -> Self {
        let chunk_size = config.chunk_size.max(1);
        let overlap = config.overlap.min(chunk_size.saturating_sub(1));
        Self {
            chunk_size,
            overlap,
        }
    }

    /// Effective chunk size.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Effective overlap.
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Splits every page in the given order. `chunk_index` restarts at 0 on each page.
    pub fn chunk_pages(&self, pages: &[PageText]) -> Vec<TextChunk> {
        let mut chunks = Vec::new();
        for page in pages {
            for (index, content) in self.split_text(&page.content).into_iter().enumerate() {
                chunks.push(TextChunk {
                    content,
                    metadata: ChunkMetadata::new(page.page_number, index as u32),
                });
            }
        }
        chunks
    }

    /// Splits a single text into overlapping windows of at most `chunk_size` characters.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.split_recursive(text, 0, &mut out);
        out
    }

    fn split_recursive(&self, text: &str, level: usize, out: &mut Vec<String>) {
        let (pieces, next_level) = split_at_level(text, level);
        let mut pending: Vec<&str> = Vec::new();
        for piece in pieces {
            if char_len(piece) <= self.chunk_size {
                pending.push(piece);
                continue;
            }
            self.merge(&pending, out);
            pending.clear();
            self.split_recursive(piece, next_level, out);
        }
        self.merge(&pending, out);
    }

    fn merge(&self, pieces: &[&str], out: &mut Vec<String>) {
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;
        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                flush_window(&window, out);
                while total > self.overlap || (total > 0 && total + len > self.chunk_size) {
                    let Some((_, dropped)) = window.pop_front() else {
                        break;
                    };
                    total -= dropped;
                }
            }
            window.push_back((piece, len));
            total += len;
        }
        flush_window(&window, out);
    }
}

/// Convenience wrapper around [`Chunker::chunk_pages`].
pub fn chunk(pages: &[PageText], chunk_size: usize, overlap: usize) -> Vec<TextChunk> {
    Chunker::new(ChunkerConfig {
        chunk_size,
        overlap,
    })
    .chunk_pages(pages)
}

fn flush_window(window: &VecDeque<(&str, usize)>, out: &mut Vec<String>) {
    if window.is_empty() {
        return;
    }
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Splits at the first boundary level (starting at `level`) present in `text`.
/// Returns the pieces and the level oversized pieces should be retried at.
fn split_at_level(text: &str, level: usize) -> (Vec<&str>, usize) {
    for (idx, separators) in BOUNDARY_LEVELS.iter().enumerate().skip(level) {
        if separators.iter().any(|sep| text.contains(sep)) {
            return (split_after(text, separators), idx + 1);
        }
    }
    let chars = text
        .char_indices()
        .map(|(at, ch)| &text[at..at + ch.len_utf8()])
        .collect();
    (chars, BOUNDARY_LEVELS.len())
}

/// Splits after every separator occurrence, keeping the separator on the left piece.
fn split_after<'t>(text: &'t str, separators: &[&str]) -> Vec<&'t str> {
    let mut cuts: Vec<usize> = separators
        .iter()
        .flat_map(|sep| text.match_indices(sep).map(|(at, hit)| at + hit.len()))
        .collect();
    cuts.sort_unstable();
    cuts.dedup();

    let mut pieces = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0usize;
    for cut in cuts {
        if cut > start {
            pieces.push(&text[start..cut]);
            start = cut;
        }
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
