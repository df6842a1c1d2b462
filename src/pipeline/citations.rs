//! Inline citation detection.
//!
//! Three independent pattern families run over the whole text:
//!
//! | Style     | Example                      | Captured reference      |
//! |-----------|------------------------------|-------------------------|
//! | `ieee`    | `[12]`, `[3, 4]`, `[5-7]`    | `12`, `3, 4`, `5-7`     |
//! | `harvard` | `(Smith and Jones, 2019)`    | `Smith and Jones, 2019` |
//! | `apa`     | `(Smith et al., 2020)`       | `Smith et al., 2020`    |
//!
//! Results are additive across families: a span matched by two families is
//! reported twice. The merged list is sorted by character offset, with ties
//! broken by the style order above.

use crate::output::{Citation, CitationStyle};
use once_cell::sync::Lazy;
use regex::Regex;

static RE_IEEE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(\d+(?:[-,\s]+\d+)*)\]").unwrap());

static RE_HARVARD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(([A-Z][a-z]+(?:\s+and\s+[A-Z][a-z]+)?,\s+\d{4}[a-z]?)\)").unwrap()
});

static RE_APA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(([A-Z][a-z]+\s+et\s+al\.,\s+\d{4}[a-z]?)\)").unwrap());

fn families() -> [(&'static Regex, CitationStyle); 3] {
    [
        (&*RE_IEEE, CitationStyle::Ieee),
        (&*RE_HARVARD, CitationStyle::Harvard),
        (&*RE_APA, CitationStyle::Apa),
    ]
}

/// Find every inline citation in `text`, ordered by position.
pub fn analyze_citations(text: &str) -> Vec<Citation> {
    let mut citations = Vec::new();

    for (re, style) in families() {
        let mut offsets = CharOffsets::new(text);
        for caps in re.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            citations.push(Citation {
                text: whole.as_str().to_string(),
                reference: caps[1].to_string(),
                position: offsets.char_index(whole.start()),
                style,
            });
        }
    }

    // Stable: equal positions keep family order.
    citations.sort_by_key(|c| c.position);
    citations
}

/// Converts ascending byte offsets into character offsets in one pass.
pub(crate) struct CharOffsets<'a> {
    text: &'a str,
    byte: usize,
    chars: usize,
}

impl<'a> CharOffsets<'a> {
    pub(crate) fn new(text: &'a str) -> Self {
        Self {
            text,
            byte: 0,
            chars: 0,
        }
    }

    /// Character index of `byte_offset`. Offsets must be non-decreasing
    /// between calls and fall on character boundaries.
    pub(crate) fn char_index(&mut self, byte_offset: usize) -> usize {
        if byte_offset < self.byte {
            self.byte = 0;
            self.chars = 0;
        }
        self.chars += self.text[self.byte..byte_offset].chars().count();
        self.byte = byte_offset;
        self.chars
    }
}
