//! Per-page text extraction from PDF files.

use std::path::Path;

use lopdf::Document;

use crate::chunker::PageText;
use crate::error::{Error, ExtractionError};

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Produces ordered per-page plain text for a file on disk.
///
/// Implementations are synchronous; callers run them on a blocking thread.
pub trait PageExtractor: Send + Sync {
    /// Returns one entry per page, 1-based, in document order.
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, ExtractionError>;
}

/// [`PageExtractor`] backed by `lopdf`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfExtractor;

impl PageExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, ExtractionError> {
        let document = Document::load(path).map_err(|source| ExtractionError::Pdf {
            path: path.to_path_buf(),
            source,
        })?;
        let mut pages = Vec::new();
        for page_number in document.get_pages().into_keys() {
            // Pages with unsupported font encodings come back empty rather than
            // failing the whole document.
            let content = match document.extract_text(&[page_number]) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(page = page_number, error = %err, "page text unavailable");
                    String::new()
                }
            };
            pages.push(PageText::new(page_number, content));
        }
        tracing::debug!(path = %path.display(), pages = pages.len(), "extracted pdf");
        Ok(pages)
    }
}

/// Rejects uploads that do not start with the PDF header.
pub fn ensure_pdf(bytes: &[u8]) -> Result<(), Error> {
    if bytes.starts_with(PDF_MAGIC) {
        Ok(())
    } else {
        Err(Error::invalid_input("only PDF uploads are supported"))
    }
}

/// Concatenates page texts with a blank line between pages.
pub fn join_pages(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|page| page.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
