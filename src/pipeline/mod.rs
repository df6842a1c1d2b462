//! Text analysis stages.
//!
//! Each submodule implements exactly one transformation over extracted text.
//! All four are pure, synchronous and deterministic: the same text and rules
//! always give the same output.
//!
//! ## Data Flow
//!
//! ```text
//!              ┌──▶ structure ──▶ chunker ──▶ chunks
//! text ────────┼──▶ citations ─────────────▶ citations
//!              └──▶ figures ───────────────▶ figures
//! ```
//!
//! 1. [`structure`] — partition lines into named sections via an ordered
//!    rule table
//! 2. [`citations`] — inline citation mentions in three styles
//! 3. [`figures`]   — figure and table mentions with caption fragments
//! 4. [`chunker`]   — paragraph split plus size enforcement over the sections
//!
//! [`crate::analyze`] runs all four and assembles the artifact.

pub mod chunker;
pub mod citations;
pub mod figures;
pub mod structure;
