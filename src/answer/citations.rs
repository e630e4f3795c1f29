//! Trailing `SOURCES: [i, j]` directive parsing.
//!
//! Parsing never fails: a directive that cannot be read degrades to zero
//! citations and is still removed from the answer text.

use std::ops::Range;

use super::{Citation, RetrievalSet};

const MARKER: &str = "SOURCES:";

/// What the model's source directive amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// No directive in the text.
    Absent,
    /// `SOURCES: []` or only whitespace inside the brackets.
    Empty,
    /// Bracket content with a token that is not an integer.
    Malformed {
        /// Raw text between the brackets.
        raw: String,
    },
    /// Cited indices in the order the model listed them. Negative or
    /// out-of-range values are kept here and skipped during resolution.
    Indices(Vec<i64>),
}

/// Directive plus the answer with every directive removed and trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    /// Directive found in the text (the last one when there are several).
    pub directive: Directive,
    /// Answer text without directives.
    pub answer: String,
}

/// Locates directives, parses the last one, and strips all of them.
///
/// Text without any directive is returned unchanged.
pub fn parse_response(text: &str) -> ParsedResponse {
    let spans = find_directives(text);
    let Some(last) = spans.last() else {
        return ParsedResponse {
            directive: Directive::Absent,
            answer: text.to_string(),
        };
    };
    let directive = parse_list(&text[last.content.clone()]);
    let mut answer = String::with_capacity(text.len());
    let mut cursor = 0usize;
    for span in &spans {
        answer.push_str(&text[cursor..span.whole.start]);
        cursor = span.whole.end;
    }
    answer.push_str(&text[cursor..]);
    ParsedResponse {
        directive,
        answer: answer.trim().to_string(),
    }
}

/// Maps cited indices to citations, skipping negative or unknown indices and
/// keeping only the first citation per page.
pub fn resolve_citations(indices: &[i64], set: &RetrievalSet) -> Vec<Citation> {
    let mut seen_pages: Vec<Option<u32>> = Vec::new();
    let mut citations = Vec::new();
    for &index in indices {
        let Some(citation) = usize::try_from(index)
            .ok()
            .and_then(|index| set.citation(index))
        else {
            continue;
        };
        if seen_pages.contains(&citation.page_number) {
            continue;
        }
        seen_pages.push(citation.page_number);
        citations.push(citation);
    }
    citations
}

struct DirectiveSpan {
    whole: Range<usize>,
    content: Range<usize>,
}

/// `SOURCES:` whitespace* `[` content-without-`]`-or-newline `]`
fn find_directives(text: &str) -> Vec<DirectiveSpan> {
    let mut spans: Vec<DirectiveSpan> = Vec::new();
    for (start, _) in text.match_indices(MARKER) {
        if spans.last().is_some_and(|prev| start < prev.whole.end) {
            continue;
        }
        let after_marker = start + MARKER.len();
        let rest = &text[after_marker..];
        let open = after_marker + (rest.len() - rest.trim_start().len());
        if !text[open..].starts_with('[') {
            continue;
        }
        let content_start = open + 1;
        let Some(offset) = text[content_start..].find(|ch: char| ch == ']' || ch == '\n') else {
            continue;
        };
        let content_end = content_start + offset;
        if text.as_bytes()[content_end] != b']' {
            continue;
        }
        spans.push(DirectiveSpan {
            whole: start..content_end + 1,
            content: content_start..content_end,
        });
    }
    spans
}

fn parse_list(raw: &str) -> Directive {
    if raw.trim().is_empty() {
        return Directive::Empty;
    }
    let mut indices = Vec::new();
    for token in raw.split(',') {
        match parse_index(token.trim()) {
            Some(index) => indices.push(index),
            None => {
                return Directive::Malformed {
                    raw: raw.to_string(),
                }
            }
        }
    }
    Directive::Indices(indices)
}

/// Optionally signed decimal integer. Values beyond `i64` saturate, since
/// they can only ever miss the retrieval set.
fn parse_index(token: &str) -> Option<i64> {
    let (negative, digits) = match token.as_bytes().first() {
        Some(b'-') => (true, &token[1..]),
        Some(b'+') => (false, &token[1..]),
        _ => (false, token),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(token.parse::<i64>().unwrap_or(if negative { i64::MIN } else { i64::MAX }))
}
