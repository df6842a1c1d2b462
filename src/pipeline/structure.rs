//! Section detection: partition raw paper text into named sections.
//!
//! The scan is line-oriented. Each non-blank line is tested against an
//! ordered table of `(label, pattern)` rules; the first rule that matches a
//! short line turns that line into a section header. Everything else is body
//! text appended to the section currently open.
//!
//! ## Rule order
//!
//! First match wins, so the table order is part of the policy. The default
//! table checks `Background` before `Related Work` and `Results` before
//! `Discussion`, which is why "Results and Discussion" opens a `Results`
//! section. Callers that need a different policy supply their own
//! [`SectionRules`] (see [`SectionRules::from_json`]).
//!
//! ## Line ranges
//!
//! Ranges are 0-based and inclusive, and a header line belongs to the section
//! it opens. Sections with blank content are dropped; their lines are absorbed
//! by the next emitted section, or by the last one at end of input, so the
//! emitted ranges always tile `[0, last_line]`.

use crate::error::IngestError;
use crate::output::{Section, HEADER_SECTION};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lines at least this many characters long are never headers.
pub const DEFAULT_MAX_HEADER_CHARS: usize = 100;

/// The canonical scholarly-paper taxonomy, in match order.
const DEFAULT_RULE_TABLE: &[(&str, &str)] = &[
    ("Abstract", r"abstract"),
    ("Introduction", r"introduction|^1(\.\s*|\.?\s+)introduction"),
    ("Background", r"background|^2(\.\s*|\.?\s+)background"),
    (
        "Related Work",
        r"related\s+work|previous\s+work|^[2-3](\.\s*|\.?\s+)related",
    ),
    (
        "Methodology",
        r"methodology|methods|^[3-4](\.\s*|\.?\s+)(methodology|methods)",
    ),
    ("Implementation", r"implementation|^[4-5](\.\s*|\.?\s+)implementation"),
    (
        "Results",
        r"results|evaluation|experiments|^[5-6](\.\s*|\.?\s+)(results|evaluation)",
    ),
    ("Discussion", r"discussion|^[6-7](\.\s*|\.?\s+)discussion"),
    ("Conclusion", r"conclusion|^[7-8](\.\s*|\.?\s+)conclusion"),
    ("References", r"references|bibliography"),
];

static DEFAULT_RULES: Lazy<SectionRules> = Lazy::new(|| {
    SectionRules::from_pairs(DEFAULT_RULE_TABLE.iter().copied())
        .expect("built-in section rules are valid regexes")
});

/// One entry of the header table.
#[derive(Debug, Clone)]
pub struct SectionRule {
    pub label: String,
    pub pattern: Regex,
}

/// Serialisable form of a rule, as read from a rules file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRuleSpec {
    pub label: String,
    pub pattern: String,
}

/// Ordered header rules plus the short-line threshold.
#[derive(Debug, Clone)]
pub struct SectionRules {
    rules: Vec<SectionRule>,
    max_header_chars: usize,
}

impl Default for SectionRules {
    fn default() -> Self {
        DEFAULT_RULES.clone()
    }
}

impl SectionRules {
    /// Compile `(label, pattern)` pairs, case-insensitively, keeping their order.
    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, IngestError> {
        let rules = pairs
            .into_iter()
            .map(|(label, pattern)| compile_rule(label, pattern))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            rules,
            max_header_chars: DEFAULT_MAX_HEADER_CHARS,
        })
    }

    /// Compile rule specs, e.g. deserialised from configuration.
    pub fn from_specs(specs: &[SectionRuleSpec]) -> Result<Self, IngestError> {
        Self::from_pairs(specs.iter().map(|s| (s.label.as_str(), s.pattern.as_str())))
    }

    /// Parse a JSON array of `{"label": …, "pattern": …}` objects.
    pub fn from_json(json: &str) -> Result<Self, IngestError> {
        let specs: Vec<SectionRuleSpec> = serde_json::from_str(json)?;
        if specs.is_empty() {
            return Err(IngestError::InvalidConfig(
                "section rule table is empty".into(),
            ));
        }
        Self::from_specs(&specs)
    }

    /// Override the short-line threshold (minimum 1).
    pub fn with_max_header_chars(mut self, n: usize) -> Self {
        self.max_header_chars = n.max(1);
        self
    }

    pub fn max_header_chars(&self) -> usize {
        self.max_header_chars
    }

    pub fn rules(&self) -> &[SectionRule] {
        &self.rules
    }

    /// The rule specs, in order (for logging or writing back to a file).
    pub fn specs(&self) -> Vec<SectionRuleSpec> {
        self.rules
            .iter()
            .map(|r| SectionRuleSpec {
                label: r.label.clone(),
                pattern: r.pattern.as_str().to_string(),
            })
            .collect()
    }

    /// Label of the first rule matching `line`, if `line` is short enough to be a header.
    pub fn match_header(&self, line: &str) -> Option<&str> {
        if line.chars().count() >= self.max_header_chars {
            return None;
        }
        self.rules
            .iter()
            .find(|r| r.pattern.is_match(line))
            .map(|r| r.label.as_str())
    }
}

fn compile_rule(label: &str, pattern: &str) -> Result<SectionRule, IngestError> {
    let pattern = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| IngestError::InvalidRule {
            label: label.to_string(),
            source,
        })?;
    Ok(SectionRule {
        label: label.to_string(),
        pattern,
    })
}

/// The section currently being filled.
struct OpenSection {
    name: String,
    raw_header: Option<String>,
    content: String,
    start_line: usize,
}

impl OpenSection {
    fn new(name: &str, raw_header: Option<&str>, start_line: usize) -> Self {
        Self {
            name: name.to_string(),
            raw_header: raw_header.map(String::from),
            content: String::new(),
            start_line,
        }
    }

    fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }

    fn close(self, end_line: usize) -> Section {
        Section {
            name: self.name,
            raw_header: self.raw_header,
            content: self.content,
            start_line: self.start_line,
            end_line,
        }
    }
}

/// Partition `text` into sections using `rules`.
///
/// Never fails: text without any recognised header comes back as a single
/// `Header` section, and all-blank text as no sections.
pub fn identify_sections(text: &str, rules: &SectionRules) -> Vec<Section> {
    let lines: Vec<&str> = text.split('\n').collect();
    let last_line = lines.len().saturating_sub(1);

    let mut sections: Vec<Section> = Vec::new();
    let mut current = OpenSection::new(HEADER_SECTION, None, 0);

    for (i, raw) in lines.iter().enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        let trimmed = line.trim();

        if !trimmed.is_empty() {
            if let Some(label) = rules.match_header(trimmed) {
                let next = OpenSection::new(label, Some(trimmed), i);
                let done = std::mem::replace(&mut current, next);
                if done.is_blank() {
                    current.start_line = done.start_line;
                } else {
                    sections.push(done.close(i - 1));
                }
                continue;
            }
        }

        current.content.push_str(line);
        current.content.push('\n');
    }

    if !current.is_blank() {
        sections.push(current.close(last_line));
    } else if let Some(prev) = sections.last_mut() {
        prev.end_line = last_line;
    }

    debug!(
        "Identified {} sections over {} lines",
        sections.len(),
        lines.len()
    );
    sections
}
