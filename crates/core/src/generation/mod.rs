//! Content generation engine.
//!
//! Documents are produced stepwise so no single call needs the whole text:
//!
//! 1. **Outline**: headings with per-section word targets
//! 2. **Expansion**: one call per section, with a rolling summary of the
//!    sections before it
//! 3. **Reconciliation**: expand the sections furthest below target until the
//!    body is within tolerance, or trim if it overshoots
//! 4. **References**: a bibliography for work types that need one

mod document;
mod engine;
mod spec;

pub use document::{
    clean_section_text, truncate_words, word_count, Document, Section, SectionKind,
};
pub use engine::ContentEngine;
pub use spec::{GenerationConfig, GenerationSpec, LengthTarget, LengthUnit, WORDS_PER_PAGE};

use crate::reasoning::ReasoningError;
use crate::retry::{Classify, FailureClass};

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("{stage} call failed: {source}")]
    Reasoning {
        stage: &'static str,
        #[source]
        source: ReasoningError,
    },

    #[error("model returned no text for section '{section}'")]
    EmptyOutput { section: String },
}

impl GenerationError {
    pub(crate) fn reasoning(stage: &'static str, source: ReasoningError) -> Self {
        GenerationError::Reasoning { stage, source }
    }
}

impl Classify for GenerationError {
    /// Calls are retried inside the engine, so whatever escapes is final.
    fn failure_class(&self) -> FailureClass {
        FailureClass::Permanent
    }
}
