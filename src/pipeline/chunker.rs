//! Chunking: turn sections into a bounded-size sequence of text chunks.
//!
//! ## Two phases
//!
//! 1. **Coarse split** — each kept section is split into paragraphs on blank
//!    lines; paragraphs shorter than `min_paragraph_chars` (trimmed) are
//!    noise and dropped. Sections with blank content and excluded labels
//!    (`References` by default) are skipped. Without sections, the whole text
//!    is split the same way under the label `Unknown`.
//! 2. **Size enforcement** — a paragraph longer than `max_chunk_chars` is cut
//!    into sentences (terminal `.`, `!`, `?`) and greedily re-packed. A
//!    sentence that alone exceeds the limit is cut at whitespace, and a single
//!    token that does is cut at character boundaries, so no chunk is ever over
//!    the limit and word order is kept.
//!
//! Ids come from one counter at emission time, so they are contiguous and in
//! document order no matter how a paragraph was split.
//!
//! `char_count` is always the number of characters in the emitted, trimmed
//! `text`, in both phases.

use crate::output::{Chunk, Section, REFERENCES_SECTION, UNKNOWN_SECTION};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Default upper bound on `Chunk::char_count`.
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 1000;

/// Paragraphs shorter than this (after trimming) are dropped as noise.
pub const DEFAULT_MIN_PARAGRAPH_CHARS: usize = 50;

static RE_PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());

static RE_SENTENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^.!?]+[.!?]+").unwrap());

/// Chunking policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkerOptions {
    pub max_chunk_chars: usize,
    pub min_paragraph_chars: usize,
    /// Section labels never chunked.
    pub excluded_sections: Vec<String>,
}

impl Default for ChunkerOptions {
    fn default() -> Self {
        Self {
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            min_paragraph_chars: DEFAULT_MIN_PARAGRAPH_CHARS,
            excluded_sections: vec![REFERENCES_SECTION.to_string()],
        }
    }
}

/// A paragraph that survived the coarse split.
struct Paragraph<'a> {
    section: &'a str,
    text: &'a str,
}

/// Chunk `sections`, or the whole of `text` when `sections` is empty.
pub fn create_chunks(sections: &[Section], text: &str, options: &ChunkerOptions) -> Vec<Chunk> {
    let max = options.max_chunk_chars.max(1);
    let paragraphs = coarse_split(sections, text, options);

    let mut chunks = Vec::with_capacity(paragraphs.len());
    for para in &paragraphs {
        if para.text.chars().count() <= max {
            chunks.push(Chunk::new(chunks.len(), para.section, para.text));
            continue;
        }
        for piece in pack_sentences(para.text, max) {
            chunks.push(Chunk::new(chunks.len(), para.section, &piece));
        }
    }

    debug!(
        "Created {} chunks from {} paragraphs (max {} chars)",
        chunks.len(),
        paragraphs.len(),
        max
    );
    chunks
}

fn coarse_split<'a>(
    sections: &'a [Section],
    text: &'a str,
    options: &ChunkerOptions,
) -> Vec<Paragraph<'a>> {
    if sections.is_empty() {
        return paragraphs_of(text, UNKNOWN_SECTION, options.min_paragraph_chars);
    }

    sections
        .iter()
        .filter(|s| !s.content.trim().is_empty())
        .filter(|s| !options.excluded_sections.iter().any(|x| x == &s.name))
        .flat_map(|s| paragraphs_of(&s.content, &s.name, options.min_paragraph_chars))
        .collect()
}

fn paragraphs_of<'a>(content: &'a str, section: &'a str, min_chars: usize) -> Vec<Paragraph<'a>> {
    RE_PARAGRAPH_BREAK
        .split(content)
        .map(str::trim)
        .filter(|p| p.chars().count() >= min_chars)
        .map(|text| Paragraph { section, text })
        .collect()
}

/// Greedy sentence packing; every returned piece is trimmed, non-empty and
/// at most `max` characters.
fn pack_sentences(text: &str, max: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for unit in sentence_units(text, max) {
        let unit_len = unit.chars().count();
        if current_len + unit_len > max && !current.trim().is_empty() {
            pieces.push(current.trim().to_string());
            current.clear();
            current_len = 0;
        }
        current.push_str(unit);
        current_len += unit_len;
    }

    if !current.trim().is_empty() {
        pieces.push(current.trim().to_string());
    }
    pieces
}

/// Sentences of `text` (trailing unterminated text included), with any
/// sentence longer than `max` broken into smaller slices.
fn sentence_units(text: &str, max: usize) -> Vec<&str> {
    let mut units = Vec::new();
    let mut end = 0;
    for m in RE_SENTENCE.find_iter(text) {
        // Leading punctuation (e.g. "...NET") never starts a match.
        if m.start() > end {
            push_bounded(&mut units, &text[end..m.start()], max);
        }
        push_bounded(&mut units, m.as_str(), max);
        end = m.end();
    }
    if end < text.len() {
        push_bounded(&mut units, &text[end..], max);
    }
    units
}

fn push_bounded<'a>(units: &mut Vec<&'a str>, sentence: &'a str, max: usize) {
    if sentence.chars().count() <= max {
        units.push(sentence);
        return;
    }

    // Split after whitespace runs, keeping each token's trailing whitespace.
    let mut start = 0;
    let mut in_space = false;
    for (i, ch) in sentence.char_indices() {
        if ch.is_whitespace() {
            in_space = true;
        } else if in_space {
            push_token(units, &sentence[start..i], max);
            start = i;
            in_space = false;
        }
    }
    push_token(units, &sentence[start..], max);
}

fn push_token<'a>(units: &mut Vec<&'a str>, token: &'a str, max: usize) {
    if token.chars().count() <= max {
        units.push(token);
        return;
    }
    let mut rest = token;
    while !rest.is_empty() {
        let cut = rest
            .char_indices()
            .nth(max)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        units.push(&rest[..cut]);
        rest = &rest[cut..];
    }
}
