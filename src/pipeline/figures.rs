//! Figure and table reference detection.
//!
//! One case-insensitive pattern: `figure`, `fig.`, `fig` or `table` at a word
//! boundary, an integer, and an optional caption fragment running up to the
//! next `.`, `!`, `?` or line break. Every mention is its own record; this is
//! evidence of reference density, not a figure registry.

use super::citations::CharOffsets;
use crate::output::{FigureKind, FigureReference};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static RE_FIGURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(figure|fig\.?|table)\s+([0-9]+)(?:\s*[.:]?\s*([^.!?\n]+))?").unwrap()
});

/// Find every figure/table mention in `text`, in scan order.
pub fn identify_figure_references(text: &str) -> Vec<FigureReference> {
    let mut offsets = CharOffsets::new(text);
    let mut figures = Vec::new();

    for caps in RE_FIGURE.captures_iter(text) {
        let (Some(whole), Some(keyword), Some(number)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            continue;
        };

        let Ok(number) = number.as_str().parse::<u32>() else {
            debug!("Skipping figure reference with oversized number: {}", whole.as_str());
            continue;
        };

        let kind = if keyword.as_str().to_lowercase().starts_with("fig") {
            FigureKind::Figure
        } else {
            FigureKind::Table
        };

        figures.push(FigureReference {
            kind,
            number,
            caption: caps
                .get(3)
                .map(|c| c.as_str().trim().to_string())
                .unwrap_or_default(),
            position: offsets.char_index(whole.start()),
        });
    }

    figures
}
