//! Output types: the extracted input and everything the pipeline derives from it.
//!
//! All types serialise with camelCase field names; [`ProcessingArtifact`] is
//! the persisted, self-describing record stored once per document.

use serde::{Deserialize, Serialize};

/// Label of the section holding text that precedes the first recognised header.
pub const HEADER_SECTION: &str = "Header";

/// Label given to chunks when the document has no sections at all.
pub const UNKNOWN_SECTION: &str = "Unknown";

/// Label of the bibliography section; excluded from chunking by default.
pub const REFERENCES_SECTION: &str = "References";

/// Document-level metadata reported by the extractor.
///
/// Fields are empty strings when the source carries no value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentMetadata {
    pub title: String,
    pub author: String,
    pub subject: String,
    pub keywords: String,
}

impl DocumentMetadata {
    /// Author list, split on commas and trimmed. Empty entries are dropped.
    pub fn authors(&self) -> Vec<String> {
        self.author
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(String::from)
            .collect()
    }
}

/// The extractor's output: plain text plus page metadata. Immutable once produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedDocument {
    pub text: String,
    #[serde(default)]
    pub page_count: usize,
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

impl ExtractedDocument {
    /// Wrap bare text with a single page and empty metadata.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            page_count: 1,
            metadata: DocumentMetadata::default(),
        }
    }
}

/// A named, contiguous line range of the document.
///
/// `start_line` and `end_line` are 0-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_header: Option<String>,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// The surface pattern family a citation matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CitationStyle {
    /// Numeric brackets: `[1]`, `[2, 3]`, `[4-6]`.
    Ieee,
    /// Author-year: `(Smith, 2020)`, `(Smith and Jones, 2019)`.
    Harvard,
    /// Et al.: `(Smith et al., 2020)`.
    Apa,
}

/// An inline citation mention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Verbatim matched text, delimiters included.
    pub text: String,
    /// Captured citation key.
    pub reference: String,
    /// Character offset of the match.
    pub position: usize,
    pub style: CitationStyle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FigureKind {
    Figure,
    Table,
}

/// A textual mention of a figure or table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FigureReference {
    #[serde(rename = "type")]
    pub kind: FigureKind,
    pub number: u32,
    /// Trailing caption fragment, trimmed; empty when absent.
    pub caption: String,
    /// Character offset of the match.
    pub position: usize,
}

/// A bounded-size unit of section content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// `chunk_<n>`, where `n` counts chunks across the whole document.
    pub id: String,
    pub section: String,
    pub text: String,
    /// Unicode scalar values in `text`.
    pub char_count: usize,
    /// Whitespace-delimited tokens in `text`.
    pub word_count: usize,
}

impl Chunk {
    pub(crate) fn new(ordinal: usize, section: &str, text: &str) -> Self {
        Self {
            id: format!("chunk_{ordinal}"),
            section: section.to_string(),
            text: text.to_string(),
            char_count: text.chars().count(),
            word_count: text.split_whitespace().count(),
        }
    }
}

/// The durable output of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingArtifact {
    pub sections: Vec<Section>,
    pub citations: Vec<Citation>,
    pub figures: Vec<FigureReference>,
    pub chunks: Vec<Chunk>,
    pub metadata: DocumentMetadata,
    pub page_count: usize,
}

impl ProcessingArtifact {
    /// Names of the emitted sections, in document order.
    pub fn section_names(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authors_split_and_trimmed() {
        let meta = DocumentMetadata {
            author: " Ada Lovelace,Charles Babbage , ".into(),
            ..Default::default()
        };
        assert_eq!(meta.authors(), vec!["Ada Lovelace", "Charles Babbage"]);
        assert!(DocumentMetadata::default().authors().is_empty());
    }

    #[test]
    fn chunk_counts_chars_not_bytes() {
        let c = Chunk::new(4, "Results", "naïve résumé café");
        assert_eq!(c.id, "chunk_4");
        assert_eq!(c.char_count, 17);
        assert_eq!(c.word_count, 3);
    }

    #[test]
    fn wire_names_match_artifact_layout() {
        let fig = FigureReference {
            kind: FigureKind::Table,
            number: 2,
            caption: String::new(),
            position: 7,
        };
        let v = serde_json::to_value(&fig).unwrap();
        assert_eq!(v["type"], "table");

        let chunk = Chunk::new(0, "Introduction", "hello world");
        let v = serde_json::to_value(&chunk).unwrap();
        assert_eq!(v["charCount"], 11);
        assert_eq!(v["wordCount"], 2);

        let style = serde_json::to_value(CitationStyle::Harvard).unwrap();
        assert_eq!(style, "harvard");
    }

    #[test]
    fn extracted_document_accepts_extractor_payload() {
        let json = r#"{"text":"Hello","pageCount":3,"metadata":{"title":"T"}}"#;
        let doc: ExtractedDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.page_count, 3);
        assert_eq!(doc.metadata.title, "T");
        assert_eq!(doc.metadata.author, "");
    }
}
